pub use anyhow::anyhow;
pub use paste::paste;
use regex::RegexBuilder;
pub use thiserror::Error;

pub type EmptyResult = anyhow::Result<()>;

// Frames from these paths are never ours
const BUILD_DIR: &str = "/.build/";
const CARGO_REGISTRY_DIR: &str = "/.cargo/registry/";
const RUSTC_DIR: &str = "/rustc/";
const GLIBC: &str = "glibc";

// Declares a thiserror enum along with snake_case constructor functions for each variant, so that
// callers can write `.ok_or_else(|| KmakeControllerError::missing_container(name))`
#[macro_export]
macro_rules! err_impl {
    (@hidden $errtype:ident, $item:ident, String) => {
        paste! {
            pub(crate) fn [<$item:snake>](in_: &str) -> anyhow::Error {
                anyhow!{$errtype::$item(in_.into())}
            }
        }
    };

    (@hidden $errtype:ident, $item:ident, $($dtype:tt)::+) => {
        paste! {
            pub(crate) fn [<$item:snake>](in_: &$($dtype)::+) -> anyhow::Error {
                anyhow!{$errtype::$item(in_.clone())}
            }
        }
    };

    ($errtype:ident,
        $(#[$errinfo:meta] $item:ident($($dtype:tt)::+),)+
    ) => {
        #[derive(Debug, Error)]
        pub(crate) enum $errtype {
            $(#[$errinfo] $item($($dtype)::+)),+
        }

        impl $errtype {
            $(err_impl! {@hidden $errtype, $item, $($dtype)::+})+
        }
    };
}

// Frames from the toolchain, the cargo registry, or libc are collapsed into one marker per run
fn is_foreign_frame(frame: &str) -> bool {
    [BUILD_DIR, CARGO_REGISTRY_DIR, RUSTC_DIR, GLIBC].iter().any(|dir| frame.contains(dir))
}

/// Strip a rendered backtrace down to our own frames.  Controller backtraces are mostly tokio and
/// kube-runtime; each contiguous run of those is replaced by a `<skipped N frame(s)>` line.
pub fn prune_backtrace(bt: &str) -> String {
    let Ok(frame_re) = RegexBuilder::new(r"^\s+\d+(?s:.*?)(\s+at\s+.*:\d+)$").multi_line(true).build() else {
        return bt.into();
    };

    let mut lines = vec![];
    let mut skipped = 0;
    for frame in frame_re.find_iter(bt).map(|m| m.as_str()).filter(|f| !f.is_empty()) {
        if is_foreign_frame(frame) {
            skipped += 1;
            continue;
        }
        if skipped > 0 {
            lines.push(format!("      -- <skipped {skipped} frame(s)> --"));
            skipped = 0;
        }
        lines.push(frame.into());
    }
    if skipped > 0 {
        lines.push(format!("      -- <skipped {skipped} frame(s)> --"));
    }
    lines.join("\n")
}

// Log an error at error level with the message and error on the first line, followed by its
// pruned backtrace
#[macro_export]
macro_rules! kmerr {
    ($err:ident, $msg:literal $(, $args:expr)* $(,)?) => {
        error!(
            concat!($msg, ": {}\n\nPartial Stack Trace:\n\n{}\n\n") $(, $args)*,
            $err,
            $crate::errors::prune_backtrace(&$err.backtrace().to_string())
        );
    };
}

pub use {err_impl, kmerr};
