//! Bounded, cycle-safe rendering of object graphs.
//!
//! A [`Traversal`] owns the state of a single rendering pass: the set of
//! objects currently being rendered (keyed by the *host* address of their
//! projection, not the mapped address), the recursion depth, and the limit
//! knobs. Traversals are cheap; make one per query and do not share them.

use std::collections::HashSet;

use smart_default::SmartDefault;

use crate::addr::MappedAddr;
use crate::env::{Environment, PyVersion};
use crate::py310;
use crate::py314;

/// Limits applied to one traversal.
#[derive(Clone, Debug, SmartDefault)]
pub struct TraverseOptions {
    /// Maximum nesting depth; -1 means unlimited. 0 is valid and means no
    /// recursion at all.
    #[default(-1)]
    pub max_recursion_depth: i64,
    /// Maximum container entries rendered; -1 means unlimited. Surplus
    /// entries are replaced by `...`.
    #[default(-1)]
    pub max_entries: i64,
    /// Maximum decoded string/bytes length; 0 means unlimited. The number
    /// of bytes cut off is surfaced in the output.
    #[default(0x400)]
    pub max_string_length: u64,
    /// Do not follow `f_back` chains when rendering frames.
    pub frame_omit_back: bool,
    /// Do not render frame locals.
    pub frame_omit_locals: bool,
    /// Render bytes objects as `bytes.fromhex('...')`.
    pub bytes_as_hex: bool,
    /// Suffix `@<addr>` on every atomic value, not just the root.
    pub show_all_addresses: bool,
    /// Single-line rendering instead of multi-line indented blocks.
    pub is_short: bool,
}

/// One rendering pass over the object graph.
#[derive(Debug)]
pub struct Traversal<'env> {
    pub env: &'env Environment,
    pub options: TraverseOptions,
    /// Host addresses of objects currently being rendered.
    in_progress: HashSet<u64>,
    pub(crate) recursion_depth: i64,
    /// Sticky: false once any validation failed during this traversal.
    pub is_valid: bool,
}

impl<'env> Traversal<'env> {
    pub fn new(env: &'env Environment, options: TraverseOptions) -> Traversal<'env> {
        Traversal {
            env,
            options,
            in_progress: HashSet::new(),
            recursion_depth: 0,
            is_valid: true,
        }
    }

    /// Renders the object at `addr`. Always terminates, never fails;
    /// failures are embedded as `<variant !tag>` tokens.
    pub fn repr(&mut self, addr: MappedAddr) -> String {
        match self.env.version {
            PyVersion::Py310 => py310::repr(self, addr),
            PyVersion::Py314 => py314::repr(self, addr),
        }
    }

    /// Renders the (non-object) thread state at `addr`.
    pub fn repr_thread_state(&mut self, addr: MappedAddr) -> String {
        match self.env.version {
            PyVersion::Py310 => py310::repr_thread_state(self, addr),
            PyVersion::Py314 => py314::repr_thread_state(self, addr),
        }
    }

    /// Whether this traversal has not yet entered any object.
    pub(crate) fn is_root(&self) -> bool {
        self.in_progress.is_empty()
    }

    pub(crate) fn recursion_allowed(&self) -> bool {
        self.options.max_recursion_depth < 0
            || self.recursion_depth < self.options.max_recursion_depth
    }

    pub(crate) fn entry_limit_reached(&self, rendered: usize) -> bool {
        self.options.max_entries >= 0 && rendered >= self.options.max_entries as usize
    }

    /// Records a validation failure and formats its token.
    pub(crate) fn fail(&mut self, label: &str, tag: &str) -> String {
        self.is_valid = false;
        format!("<{} !{}>", label, tag)
    }

    /// Runs `render` with `host` marked in-progress and the depth bumped.
    /// Returns `None` if `host` is already being rendered (a cycle).
    pub(crate) fn nested<F>(&mut self, host: u64, render: F) -> Option<String>
    where
        F: FnOnce(&mut Traversal<'env>) -> String,
    {
        if !self.in_progress.insert(host) {
            return None;
        }
        self.recursion_depth += 1;
        let rendered = render(self);
        self.recursion_depth -= 1;
        self.in_progress.remove(&host);
        Some(rendered)
    }

    fn item_indent(&self) -> String {
        " ".repeat((self.recursion_depth.max(0) as usize) * 2)
    }

    fn close_indent(&self) -> String {
        " ".repeat(((self.recursion_depth - 1).max(0) as usize) * 2)
    }

    /// Renders a token variant: `<label tok tok ...>`, single-line when
    /// short, otherwise one token per line. Call inside [`nested`].
    pub(crate) fn render_tokens(&self, label: &str, tokens: &[String]) -> String {
        if self.options.is_short {
            let mut out = format!("<{}", label);
            for token in tokens {
                out.push(' ');
                out.push_str(token);
            }
            out.push('>');
            out
        } else {
            let mut out = format!("<{}\n", label);
            for token in tokens {
                out.push_str(&self.item_indent());
                out.push_str(token);
                out.push('\n');
            }
            out.push_str(&self.close_indent());
            out.push('>');
            out
        }
    }

    /// Renders a sequence container: `<label item, item,>` with `...` for
    /// entries past the limit. Call inside [`nested`].
    pub(crate) fn render_container(
        &self,
        label: &str,
        items: &[String],
        has_extra: bool,
    ) -> String {
        if items.is_empty() && !has_extra {
            return format!("<{}>", label);
        }
        if items.len() == 1 && !has_extra {
            return format!("<{} {},>", label, items[0]);
        }
        if self.options.is_short {
            let mut out = format!("<{}", label);
            for item in items {
                out.push(' ');
                out.push_str(item);
                out.push(',');
            }
            if has_extra {
                out.push_str(" ...");
            }
            out.push('>');
            out
        } else {
            let mut out = format!("<{}\n", label);
            for item in items {
                out.push_str(&self.item_indent());
                out.push_str(item);
                out.push_str(",\n");
            }
            if has_extra {
                out.push_str(&self.item_indent());
                out.push_str("...\n");
            }
            out.push_str(&self.close_indent());
            out.push('>');
            out
        }
    }

    /// Renders dict entries as brace literals, sorted by rendered key. Call
    /// inside [`nested`].
    pub(crate) fn render_dict(
        &self,
        mut entries: Vec<(String, String)>,
        has_extra: bool,
    ) -> String {
        if entries.is_empty() && !has_extra {
            return "{}".to_string();
        }
        if entries.len() == 1 && !has_extra {
            return format!("{{{}: {}}}", entries[0].0, entries[0].1);
        }
        entries.sort();
        if self.options.is_short {
            let mut parts: Vec<String> = entries
                .into_iter()
                .map(|(key, value)| format!("{}: {}", key, value))
                .collect();
            if has_extra {
                parts.push("...".to_string());
            }
            format!("{{{}}}", parts.join(", "))
        } else {
            let mut out = "{\n".to_string();
            for (key, value) in entries {
                out.push_str(&self.item_indent());
                out.push_str(&key);
                out.push_str(": ");
                out.push_str(&value);
                out.push_str(",\n");
            }
            if has_extra {
                out.push_str(&self.item_indent());
                out.push_str("...\n");
            }
            out.push_str(&self.close_indent());
            out.push('}');
            out
        }
    }
}
