use crate::ir::function::Function;
use crate::ir::types::Type;

/// A module-level global variable. Used as the base of non-global loads
/// (§4.4) and as the target of constant-globalization (§4.5).
#[derive(Debug, Clone)]
pub struct GlobalVariable {
    pub name: String,
    pub ty: Type,
    pub is_constant: bool,
    pub internal_linkage: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Module {
    pub functions: Vec<Function>,
    pub globals: Vec<GlobalVariable>,
}

impl Module {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.name == name)
    }

    pub fn global(&self, name: &str) -> Option<&GlobalVariable> {
        self.globals.iter().find(|g| g.name == name)
    }
}
