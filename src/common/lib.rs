// Copyright (c) 2021 The Minispec Authors

//! This crate contains the fundamental utilities used by the rest of the
//! Minispec compiler.

#[macro_use]
extern crate bitflags;

pub mod errors;
pub mod id;
pub mod name;
pub mod source;
pub mod util;

pub use self::id::NodeId;
use crate::errors::{DiagBuilder2, DiagEmitter, Severity};
use std::cell::{Cell, RefCell};
use std::collections::HashSet;

/// Per-compilation state: options, failure tracking, and the deduplicating
/// reporter that all user-facing diagnostics funnel through.
pub struct Session {
    pub opts: SessionOptions,
    /// Whether any error diagnostics were produced.
    pub failed: Cell<bool>,
    err_msgs: RefCell<HashSet<String>>,
    warn_msgs: RefCell<HashSet<String>>,
    err_ctxs: RefCell<HashSet<NodeId>>,
    warn_ctxs: RefCell<HashSet<NodeId>>,
    total_errs: Cell<usize>,
    total_warns: Cell<usize>,
}

impl Session {
    /// Create a new session.
    pub fn new() -> Session {
        Session {
            opts: Default::default(),
            failed: Cell::new(false),
            err_msgs: RefCell::new(HashSet::new()),
            warn_msgs: RefCell::new(HashSet::new()),
            err_ctxs: RefCell::new(HashSet::new()),
            warn_ctxs: RefCell::new(HashSet::new()),
            total_errs: Cell::new(0),
            total_warns: Cell::new(0),
        }
    }

    /// Check whether an error has occurred during the session.
    pub fn failed(&self) -> bool {
        self.failed.get()
    }

    /// Report a user-code message, deduplicating against previously reported
    /// ones. A message that was already printed verbatim is dropped entirely
    /// (it does not even count towards the totals); a distinct message whose
    /// originating node already produced a report is counted but suppressed
    /// unless `report_all_errors` is set.
    pub fn report_msg(&self, is_error: bool, msg: &str, loc_info: &str, ctx: Option<NodeId>) {
        let msgs = if is_error {
            &self.err_msgs
        } else {
            &self.warn_msgs
        };
        let ctxs = if is_error {
            &self.err_ctxs
        } else {
            &self.warn_ctxs
        };
        if msgs.borrow().contains(msg) {
            // Sometimes bsc derps out and spits the same error multiple times
            // (e.g. double-writes). Drop exact repeats regardless of the
            // report-all setting.
            return;
        }
        let ctx_seen = ctx.map(|c| ctxs.borrow().contains(&c)).unwrap_or(false);
        if self.opts.report_all_errors || !ctx_seen {
            msgs.borrow_mut().insert(msg.to_string());
            if let Some(c) = ctx {
                ctxs.borrow_mut().insert(c);
            }
            eprintln!("{}{}", loc_info, msg);
        }
        if is_error {
            self.total_errs.set(self.total_errs.get() + 1);
            self.failed.set(true);
        } else {
            self.total_warns.set(self.total_warns.get() + 1);
        }
    }

    pub fn report_err(&self, msg: &str, loc_info: &str, ctx: Option<NodeId>) {
        self.report_msg(true, msg, loc_info, ctx)
    }

    pub fn report_warn(&self, msg: &str, loc_info: &str, ctx: Option<NodeId>) {
        self.report_msg(false, msg, loc_info, ctx)
    }

    /// Total number of errors recorded, including suppressed ones.
    pub fn error_count(&self) -> usize {
        self.total_errs.get()
    }

    /// Total number of warnings recorded, including suppressed ones.
    pub fn warning_count(&self) -> usize {
        self.total_warns.get()
    }

    /// Number of distinct error messages actually printed.
    pub fn printed_error_count(&self) -> usize {
        self.err_msgs.borrow().len()
    }

    /// Conclude a reporting phase. Returns `Err(())` if any errors were
    /// recorded, printing a note about suppressed ones first.
    pub fn finish(&self) -> Result<(), ()> {
        let total = self.total_errs.get();
        if total == 0 {
            return Ok(());
        }
        let printed = self.err_msgs.borrow().len();
        if total > printed {
            eprintln!(
                "{} omitted {} errors similar to those reported; run with {} to see all errors",
                errors::note_colored("note:"),
                total - printed,
                errors::hl_colored("--all-errors")
            );
        }
        Err(())
    }
}

impl DiagEmitter for Session {
    fn emit(&self, diag: DiagBuilder2) {
        if diag.severity >= Severity::Error {
            self.failed.set(true);
            self.total_errs.set(self.total_errs.get() + 1);
        }
        eprintln!("{}", diag);
    }
}

/// A set of options for a session.
///
/// The arguments passed on the command line are intended to modify these
/// values in order to configure the execution of the program.
#[derive(Debug, Default)]
pub struct SessionOptions {
    /// Report all errors and warnings, bypassing the deduplicating filter.
    pub report_all_errors: bool,
    /// The verbosity options.
    pub verbosity: Verbosity,
}

bitflags! {
    /// A set of verbosity options for a session.
    ///
    /// These flags control how much information the compiler emits.
    #[derive(Default)]
    pub struct Verbosity: u8 {
        const ELAB   = 0b001;
        const PARAMS = 0b010;
        const EMIT   = 0b100;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_by_message() {
        let sess = Session::new();
        sess.report_err("boom", "", None);
        sess.report_err("boom", "", None);
        assert_eq!(sess.total_errs.get(), 1);
        assert!(sess.failed());
        assert!(sess.finish().is_err());
    }

    #[test]
    fn dedup_by_node() {
        let sess = Session::new();
        let n = NodeId::new(7);
        sess.report_err("first", "", Some(n));
        sess.report_err("second", "", Some(n));
        // Both count, only the first was printed.
        assert_eq!(sess.total_errs.get(), 2);
        assert_eq!(sess.err_msgs.borrow().len(), 1);
    }

    #[test]
    fn report_all_overrides_node_dedup() {
        let mut sess = Session::new();
        sess.opts.report_all_errors = true;
        let n = NodeId::new(7);
        sess.report_err("first", "", Some(n));
        sess.report_err("second", "", Some(n));
        assert_eq!(sess.err_msgs.borrow().len(), 2);
    }

    #[test]
    fn warnings_do_not_fail() {
        let sess = Session::new();
        sess.report_warn("careful", "", None);
        assert!(!sess.failed());
        assert!(sess.finish().is_ok());
    }
}
