use std::collections::HashSet;

/// In place of a CLI (an explicit non-goal), the embedding host
/// configures TX with a plain struct (§6 "Pass configuration").
#[derive(Debug, Clone, Default)]
pub struct TxConfig {
    /// Equivalent of `--func-explicit-trans`.
    pub explicit_trans: bool,
    /// Equivalent of repeated `--called-from-outside=<name>`.
    pub called_from_outside: HashSet<String>,
    /// Equivalent of `--func-pointers-known`.
    pub func_pointers_known: bool,
}

impl TxConfig {
    #[must_use]
    pub fn is_called_from_outside(&self, function_name: &str) -> bool {
        function_name == "main" || self.explicit_trans || self.called_from_outside.contains(function_name)
    }
}
