//! Method bodies as produced by the container parser

/// One exception table entry, byte offsets into the method's code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionInfo {
    pub from: u32,
    pub to: u32,
    pub target: u32,
    /// Multiname index of the caught type, 0 for catch-all
    pub exc_type: u32,
    /// Multiname index of the catch variable, 0 if none
    pub var_name: u32,
}

impl ExceptionInfo {
    pub fn catch_all(from: u32, to: u32, target: u32) -> Self {
        ExceptionInfo { from, to, target, exc_type: 0, var_name: 0 }
    }

    pub fn typed(from: u32, to: u32, target: u32, exc_type: u32) -> Self {
        ExceptionInfo { from, to, target, exc_type, var_name: 0 }
    }
}

/// A method body with its declared bounds
#[derive(Debug, Clone)]
pub struct MethodBody {
    /// Method name as declared
    pub name: String,
    /// Owning class, fully qualified (`pkg.sub::Class`), if any
    pub class_name: Option<String>,
    /// Index in the ABC method table, when registered there
    pub method_index: Option<u32>,
    pub is_constructor: bool,
    pub param_count: u32,
    pub code: Vec<u8>,
    pub max_stack: u32,
    pub local_count: u32,
    pub init_scope_depth: u32,
    pub max_scope_depth: u32,
    pub exceptions: Vec<ExceptionInfo>,
}

impl MethodBody {
    /// A free function with generous bounds
    pub fn new(name: impl Into<String>, code: Vec<u8>) -> Self {
        MethodBody {
            name: name.into(),
            class_name: None,
            method_index: None,
            is_constructor: false,
            param_count: 0,
            code,
            max_stack: 16,
            local_count: 1,
            init_scope_depth: 0,
            max_scope_depth: 4,
            exceptions: Vec::new(),
        }
    }

    pub fn with_class(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = Some(class_name.into());
        self
    }

    pub fn with_index(mut self, index: u32) -> Self {
        self.method_index = Some(index);
        self
    }

    /// Set the parameter count; locals grow to hold `this` plus parameters
    pub fn with_params(mut self, count: u32) -> Self {
        self.param_count = count;
        self.local_count = self.local_count.max(count + 1);
        self
    }

    pub fn with_locals(mut self, count: u32) -> Self {
        self.local_count = count;
        self
    }

    pub fn with_bounds(mut self, max_stack: u32, init_scope: u32, max_scope: u32) -> Self {
        self.max_stack = max_stack;
        self.init_scope_depth = init_scope;
        self.max_scope_depth = max_scope;
        self
    }

    pub fn with_exception(mut self, info: ExceptionInfo) -> Self {
        self.exceptions.push(info);
        self
    }

    pub fn constructor(mut self) -> Self {
        self.is_constructor = true;
        self
    }

    /// Scope entries this method may push on top of its initial scope
    pub fn scope_span(&self) -> u32 {
        self.max_scope_depth.saturating_sub(self.init_scope_depth)
    }

    /// `Class/method` or the bare method name
    pub fn qualified_name(&self) -> String {
        match &self.class_name {
            Some(class) => format!("{}/{}", class, self.name),
            None => self.name.clone(),
        }
    }
}
