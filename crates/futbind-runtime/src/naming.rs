//! Symbol Naming Convention
//!
//! Every symbol the runtime cares about starts with one shared prefix
//! (`futhark_` by default). What follows the prefix says what the symbol is:
//!
//! | Suffix pattern         | Role                                   |
//! |------------------------|----------------------------------------|
//! | `new_<T>`              | array constructor for type `T`         |
//! | `free_<T>`             | destructor                             |
//! | `values_<T>`           | copy elements into a host buffer       |
//! | `shape_<T>`            | borrow the dimension vector            |
//! | `store_<T>`            | serialize to bytes                     |
//! | `restore_<T>`          | deserialize from bytes                 |
//! | `entry_<name>`         | entry point                            |
//! | `context_<op>`         | context and configuration lifecycle    |
//!
//! The `new_raw_` and `values_raw_` variants operate on device memory and
//! are not classified.

use smol_str::SmolStr;

/// Default symbol prefix
pub const DEFAULT_PREFIX: &str = "futhark_";

/// What a symbol does, judged from its name alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolRole<'a> {
    Constructor(&'a str),
    Destructor(&'a str),
    Values(&'a str),
    Shape(&'a str),
    Store(&'a str),
    Restore(&'a str),
    Entry(&'a str),
    Context(&'a str),
    Other,
}

/// The prefix convention a library's symbols follow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Naming {
    prefix: SmolStr,
}

impl Default for Naming {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

impl Naming {
    pub fn new(prefix: impl Into<SmolStr>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Full symbol name for a suffix, `sync` becoming `futhark_sync`
    pub fn symbol(&self, suffix: &str) -> String {
        format!("{}{}", self.prefix, suffix)
    }

    /// Symbol of a context operation, `new` becoming `futhark_context_new`
    pub fn context_symbol(&self, op: &str) -> String {
        format!("{}context_{}", self.prefix, op)
    }

    /// Struct tag of the handle type named `name`
    pub fn struct_tag(&self, name: &str) -> String {
        self.symbol(name)
    }

    /// Prefix of the `#define` flags naming the compilation backend
    pub fn backend_flag_prefix(&self) -> String {
        format!("{}BACKEND_", self.prefix.to_uppercase())
    }

    /// Classify a symbol by its name
    pub fn classify<'a>(&self, symbol: &'a str) -> SymbolRole<'a> {
        let Some(rest) = symbol.strip_prefix(self.prefix.as_str()) else {
            return SymbolRole::Other;
        };

        if rest.starts_with("new_raw_") || rest.starts_with("values_raw_") {
            return SymbolRole::Other;
        }

        let patterns: [(&str, fn(&'a str) -> SymbolRole<'a>); 8] = [
            ("entry_", SymbolRole::Entry),
            ("context_", SymbolRole::Context),
            ("new_", SymbolRole::Constructor),
            ("free_", SymbolRole::Destructor),
            ("values_", SymbolRole::Values),
            ("shape_", SymbolRole::Shape),
            ("store_", SymbolRole::Store),
            ("restore_", SymbolRole::Restore),
        ];

        patterns
            .iter()
            .find_map(|(pattern, role)| {
                rest.strip_prefix(pattern)
                    .filter(|name| !name.is_empty())
                    .map(role)
            })
            .unwrap_or(SymbolRole::Other)
    }
}
