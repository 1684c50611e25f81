// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use stigqter::model::{ControlRef, cci_number, control_from_cci_index};
use stigqter::workers::ckl_import::parse_ckl;
use stigqter::workers::stig_add::parse_benchmark;

#[derive(Debug, Arbitrary)]
enum Input<'a> {
    Benchmark(&'a str),
    Checklist(&'a str),
    ControlName(&'a str),
    CciIndex(&'a str),
}

fuzz_target!(|input: Input<'_>| {
    match input {
        Input::Benchmark(doc) => {
            let _ = parse_benchmark(doc, "fuzz.xml");
        }
        Input::Checklist(doc) => {
            let _ = parse_ckl(doc);
        }
        Input::ControlName(name) => {
            if let Ok(control) = ControlRef::parse(name) {
                let _ = ControlRef::parse(&control.to_string());
            }
        }
        Input::CciIndex(index) => {
            let _ = ControlRef::parse(&control_from_cci_index(index));
            let _ = cci_number(index);
        }
    }
});
