// Copyright (c) 2021 The Minispec Authors

//! A compiler front-end for Minispec, a pedagogically-motivated hardware
//! description language. Minispec source is elaborated and translated to
//! Bluespec (BSV), which an external `bsc` invocation turns into a
//! simulator or Verilog; `bsc`'s diagnostics are translated back into
//! Minispec terms.

#[macro_use]
extern crate log;

// Re-export everything from the common crate.
pub extern crate minispec_common as common;
pub use crate::common::*;

pub extern crate minispec_syntax as syntax;

pub mod combine;
pub mod diag;
pub mod parse;
pub mod report;
pub mod translate;
