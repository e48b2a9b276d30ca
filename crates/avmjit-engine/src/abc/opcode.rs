//! AVM2 opcode table
//!
//! Every byte value the AVM2 instruction set assigns, together with the shape
//! of the operands that follow it in the code stream. Whether the engine can
//! actually translate an opcode is decided by the decoder, not here.

/// Shape of the operand bytes following an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandFormat {
    /// No operands
    None,
    /// One unsigned byte
    U8,
    /// One signed byte
    S8,
    /// One u30 varint
    U30,
    /// Two u30 varints
    U30U30,
    /// A signed 24-bit branch offset
    S24,
    /// A multiname index (u30)
    Multiname,
    /// A multiname index followed by an argument count
    MultinameArgs,
    /// Default offset, case count, then `case count + 1` offsets
    LookupSwitch,
    /// `debug`: u8 kind, u30 name, u8 register, u30 extra
    Debug,
}

macro_rules! opcodes {
    ($( $(#[$doc:meta])* $variant:ident = $byte:literal, $name:literal, $fmt:ident; )*) => {
        /// AVM2 opcode enumeration
        ///
        /// Byte values follow the AVM2 overview. Gaps in the byte space are
        /// not opcodes and decode as unknown bytecode.
        #[repr(u8)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Opcode {
            $( $(#[$doc])* $variant = $byte, )*
        }

        impl Opcode {
            /// Convert a byte to an opcode
            pub fn from_u8(byte: u8) -> Option<Self> {
                match byte {
                    $( $byte => Some(Self::$variant), )*
                    _ => None,
                }
            }

            /// Mnemonic as it appears in disassembly
            pub fn name(self) -> &'static str {
                match self {
                    $( Self::$variant => $name, )*
                }
            }

            /// Operand layout following the opcode byte
            pub fn format(self) -> OperandFormat {
                match self {
                    $( Self::$variant => OperandFormat::$fmt, )*
                }
            }

            /// Every opcode in byte order
            pub const ALL: &'static [Opcode] = &[ $( Self::$variant, )* ];
        }
    };
}

opcodes! {
    // ===== Control & debugging =====
    /// Breakpoint
    Bkpt = 0x01, "bkpt", None;
    /// No operation
    Nop = 0x02, "nop", None;
    /// Throw the top of stack
    Throw = 0x03, "throw", None;
    /// Read a property from the base class
    GetSuper = 0x04, "getsuper", Multiname;
    /// Write a property on the base class
    SetSuper = 0x05, "setsuper", Multiname;
    /// Set default XML namespace
    Dxns = 0x06, "dxns", U30;
    /// Set default XML namespace from the stack
    DxnsLate = 0x07, "dxnslate", None;
    /// Mark a local register as undefined
    Kill = 0x08, "kill", U30;
    /// Branch target marker
    Label = 0x09, "label", None;

    // ===== Branches =====
    /// Branch if not less than
    IfNlt = 0x0C, "ifnlt", S24;
    /// Branch if not less or equal
    IfNle = 0x0D, "ifnle", S24;
    /// Branch if not greater than
    IfNgt = 0x0E, "ifngt", S24;
    /// Branch if not greater or equal
    IfNge = 0x0F, "ifnge", S24;
    /// Unconditional branch
    Jump = 0x10, "jump", S24;
    /// Branch if true
    IfTrue = 0x11, "iftrue", S24;
    /// Branch if false
    IfFalse = 0x12, "iffalse", S24;
    /// Branch if equal
    IfEq = 0x13, "ifeq", S24;
    /// Branch if not equal
    IfNe = 0x14, "ifne", S24;
    /// Branch if less than
    IfLt = 0x15, "iflt", S24;
    /// Branch if less or equal
    IfLe = 0x16, "ifle", S24;
    /// Branch if greater than
    IfGt = 0x17, "ifgt", S24;
    /// Branch if greater or equal
    IfGe = 0x18, "ifge", S24;
    /// Branch if strictly equal
    IfStrictEq = 0x19, "ifstricteq", S24;
    /// Branch if strictly not equal
    IfStrictNe = 0x1A, "ifstrictne", S24;
    /// Jump table
    LookupSwitch = 0x1B, "lookupswitch", LookupSwitch;

    // ===== Scope & iteration =====
    /// Push a `with` scope
    PushWith = 0x1C, "pushwith", None;
    /// Pop the innermost scope
    PopScope = 0x1D, "popscope", None;
    /// Enumerated property name
    NextName = 0x1E, "nextname", None;
    /// Next enumeration index
    HasNext = 0x1F, "hasnext", None;

    // ===== Literals & stack =====
    /// Push null
    PushNull = 0x20, "pushnull", None;
    /// Push undefined
    PushUndefined = 0x21, "pushundefined", None;
    /// Enumerated property value
    NextValue = 0x23, "nextvalue", None;
    /// Push a sign-extended byte
    PushByte = 0x24, "pushbyte", S8;
    /// Push a short integer
    PushShort = 0x25, "pushshort", U30;
    /// Push true
    PushTrue = 0x26, "pushtrue", None;
    /// Push false
    PushFalse = 0x27, "pushfalse", None;
    /// Push NaN
    PushNaN = 0x28, "pushnan", None;
    /// Discard the top of stack
    Pop = 0x29, "pop", None;
    /// Duplicate the top of stack
    Dup = 0x2A, "dup", None;
    /// Swap the two topmost values
    Swap = 0x2B, "swap", None;
    /// Push a string constant
    PushString = 0x2C, "pushstring", U30;
    /// Push an int constant
    PushInt = 0x2D, "pushint", U30;
    /// Push a uint constant
    PushUInt = 0x2E, "pushuint", U30;
    /// Push a double constant
    PushDouble = 0x2F, "pushdouble", U30;
    /// Push an object onto the scope stack
    PushScope = 0x30, "pushscope", None;
    /// Push a namespace constant
    PushNamespace = 0x31, "pushnamespace", U30;
    /// Register-based enumeration step
    HasNext2 = 0x32, "hasnext2", U30U30;

    // ===== Domain memory =====
    /// Load signed 8-bit
    Li8 = 0x35, "li8", None;
    /// Load 16-bit
    Li16 = 0x36, "li16", None;
    /// Load 32-bit
    Li32 = 0x37, "li32", None;
    /// Load 32-bit float
    Lf32 = 0x38, "lf32", None;
    /// Load 64-bit float
    Lf64 = 0x39, "lf64", None;
    /// Store 8-bit
    Si8 = 0x3A, "si8", None;
    /// Store 16-bit
    Si16 = 0x3B, "si16", None;
    /// Store 32-bit
    Si32 = 0x3C, "si32", None;
    /// Store 32-bit float
    Sf32 = 0x3D, "sf32", None;
    /// Store 64-bit float
    Sf64 = 0x3E, "sf64", None;

    // ===== Calls & construction =====
    /// Create a closure
    NewFunction = 0x40, "newfunction", U30;
    /// Call a function value
    Call = 0x41, "call", U30;
    /// Construct with a constructor value
    Construct = 0x42, "construct", U30;
    /// Call through a dispatch id
    CallMethod = 0x43, "callmethod", U30U30;
    /// Call a method by index
    CallStatic = 0x44, "callstatic", U30U30;
    /// Call a base class method
    CallSuper = 0x45, "callsuper", MultinameArgs;
    /// Call a property
    CallProperty = 0x46, "callproperty", MultinameArgs;
    /// Return undefined
    ReturnVoid = 0x47, "returnvoid", None;
    /// Return the top of stack
    ReturnValue = 0x48, "returnvalue", None;
    /// Run the base class constructor
    ConstructSuper = 0x49, "constructsuper", U30;
    /// Construct a property
    ConstructProp = 0x4A, "constructprop", MultinameArgs;
    /// Call a property with a null receiver
    CallPropLex = 0x4C, "callproplex", MultinameArgs;
    /// Call a base class method, discarding the result
    CallSuperVoid = 0x4E, "callsupervoid", MultinameArgs;
    /// Call a property, discarding the result
    CallPropVoid = 0x4F, "callpropvoid", MultinameArgs;
    /// Sign-extend from 1 bit
    Sxi1 = 0x50, "sxi1", None;
    /// Sign-extend from 8 bits
    Sxi8 = 0x51, "sxi8", None;
    /// Sign-extend from 16 bits
    Sxi16 = 0x52, "sxi16", None;
    /// Parameterize a generic type
    ApplyType = 0x53, "applytype", U30;
    /// Build an object from name/value pairs
    NewObject = 0x55, "newobject", U30;
    /// Build an array
    NewArray = 0x56, "newarray", U30;
    /// Create the activation object
    NewActivation = 0x57, "newactivation", None;
    /// Create a class
    NewClass = 0x58, "newclass", U30;
    /// XML descendants
    GetDescendants = 0x59, "getdescendants", Multiname;
    /// Create a catch scope
    NewCatch = 0x5A, "newcatch", U30;

    // ===== Property access =====
    /// Find a property on the scope chain, failing if absent
    FindPropStrict = 0x5D, "findpropstrict", Multiname;
    /// Find a property on the scope chain
    FindProperty = 0x5E, "findproperty", Multiname;
    /// Find a script-level definition
    FindDef = 0x5F, "finddef", Multiname;
    /// Find and get a property
    GetLex = 0x60, "getlex", Multiname;
    /// Write a property
    SetProperty = 0x61, "setproperty", Multiname;
    /// Read a local register
    GetLocal = 0x62, "getlocal", U30;
    /// Write a local register
    SetLocal = 0x63, "setlocal", U30;
    /// Push the global scope
    GetGlobalScope = 0x64, "getglobalscope", None;
    /// Read a local scope stack entry
    GetScopeObject = 0x65, "getscopeobject", U8;
    /// Read a property
    GetProperty = 0x66, "getproperty", Multiname;
    /// Read a captured outer scope entry
    GetOuterScope = 0x67, "getouterscope", U30;
    /// Initialize a property
    InitProperty = 0x68, "initproperty", Multiname;
    /// Delete a property
    DeleteProperty = 0x6A, "deleteproperty", Multiname;
    /// Read a slot
    GetSlot = 0x6C, "getslot", U30;
    /// Write a slot
    SetSlot = 0x6D, "setslot", U30;
    /// Read a global slot
    GetGlobalSlot = 0x6E, "getglobalslot", U30;
    /// Write a global slot
    SetGlobalSlot = 0x6F, "setglobalslot", U30;

    // ===== Conversions =====
    /// Convert to String
    ConvertS = 0x70, "convert_s", None;
    /// Escape XML element content
    EscXElem = 0x71, "esc_xelem", None;
    /// Escape XML attribute content
    EscXAttr = 0x72, "esc_xattr", None;
    /// Convert to int
    ConvertI = 0x73, "convert_i", None;
    /// Convert to uint
    ConvertU = 0x74, "convert_u", None;
    /// Convert to Number
    ConvertD = 0x75, "convert_d", None;
    /// Convert to Boolean
    ConvertB = 0x76, "convert_b", None;
    /// Convert to Object
    ConvertO = 0x77, "convert_o", None;
    /// Check an XML filter operand
    CheckFilter = 0x78, "checkfilter", None;
    /// Coerce to a named type
    Coerce = 0x80, "coerce", Multiname;
    /// Coerce to Boolean
    CoerceB = 0x81, "coerce_b", None;
    /// Coerce to any
    CoerceA = 0x82, "coerce_a", None;
    /// Coerce to int
    CoerceI = 0x83, "coerce_i", None;
    /// Coerce to Number
    CoerceD = 0x84, "coerce_d", None;
    /// Coerce to String
    CoerceS = 0x85, "coerce_s", None;
    /// Cast to a named type or null
    AsType = 0x86, "astype", Multiname;
    /// Cast to a type taken from the stack
    AsTypeLate = 0x87, "astypelate", None;
    /// Coerce to uint
    CoerceU = 0x88, "coerce_u", None;
    /// Coerce to Object
    CoerceO = 0x89, "coerce_o", None;

    // ===== Arithmetic =====
    /// Numeric negation
    Negate = 0x90, "negate", None;
    /// Add one
    Increment = 0x91, "increment", None;
    /// Add one to a local
    IncLocal = 0x92, "inclocal", U30;
    /// Subtract one
    Decrement = 0x93, "decrement", None;
    /// Subtract one from a local
    DecLocal = 0x94, "declocal", U30;
    /// Type name string
    TypeOf = 0x95, "typeof", None;
    /// Boolean not
    Not = 0x96, "not", None;
    /// Bitwise not
    BitNot = 0x97, "bitnot", None;
    /// Add or concatenate
    Add = 0xA0, "add", None;
    /// Subtract
    Subtract = 0xA1, "subtract", None;
    /// Multiply
    Multiply = 0xA2, "multiply", None;
    /// Divide
    Divide = 0xA3, "divide", None;
    /// Remainder
    Modulo = 0xA4, "modulo", None;
    /// Shift left
    LShift = 0xA5, "lshift", None;
    /// Arithmetic shift right
    RShift = 0xA6, "rshift", None;
    /// Logical shift right
    URShift = 0xA7, "urshift", None;
    /// Bitwise and
    BitAnd = 0xA8, "bitand", None;
    /// Bitwise or
    BitOr = 0xA9, "bitor", None;
    /// Bitwise xor
    BitXor = 0xAA, "bitxor", None;
    /// Abstract equality
    Equals = 0xAB, "equals", None;
    /// Strict equality
    StrictEquals = 0xAC, "strictequals", None;
    /// Less than
    LessThan = 0xAD, "lessthan", None;
    /// Less or equal
    LessEquals = 0xAE, "lessequals", None;
    /// Greater than
    GreaterThan = 0xAF, "greaterthan", None;
    /// Greater or equal
    GreaterEquals = 0xB0, "greaterequals", None;
    /// Prototype chain test
    InstanceOf = 0xB1, "instanceof", None;
    /// Type test against a named type
    IsType = 0xB2, "istype", Multiname;
    /// Type test against a type taken from the stack
    IsTypeLate = 0xB3, "istypelate", None;
    /// Property existence test
    In = 0xB4, "in", None;
    /// Integer add one
    IncrementI = 0xC0, "increment_i", None;
    /// Integer subtract one
    DecrementI = 0xC1, "decrement_i", None;
    /// Integer add one to a local
    IncLocalI = 0xC2, "inclocal_i", U30;
    /// Integer subtract one from a local
    DecLocalI = 0xC3, "declocal_i", U30;
    /// Integer negation
    NegateI = 0xC4, "negate_i", None;
    /// Integer add
    AddI = 0xC5, "add_i", None;
    /// Integer subtract
    SubtractI = 0xC6, "subtract_i", None;
    /// Integer multiply
    MultiplyI = 0xC7, "multiply_i", None;

    // ===== Local shorthands =====
    /// Read local 0
    GetLocal0 = 0xD0, "getlocal0", None;
    /// Read local 1
    GetLocal1 = 0xD1, "getlocal1", None;
    /// Read local 2
    GetLocal2 = 0xD2, "getlocal2", None;
    /// Read local 3
    GetLocal3 = 0xD3, "getlocal3", None;
    /// Write local 0
    SetLocal0 = 0xD4, "setlocal0", None;
    /// Write local 1
    SetLocal1 = 0xD5, "setlocal1", None;
    /// Write local 2
    SetLocal2 = 0xD6, "setlocal2", None;
    /// Write local 3
    SetLocal3 = 0xD7, "setlocal3", None;

    // ===== Debug info =====
    /// Debug register info
    Debug = 0xEF, "debug", Debug;
    /// Source line
    DebugLine = 0xF0, "debugline", U30;
    /// Source file
    DebugFile = 0xF1, "debugfile", U30;
    /// Line breakpoint
    BkptLine = 0xF2, "bkptline", U30;
    /// Timestamp marker
    Timestamp = 0xF3, "timestamp", None;
}

impl Opcode {
    /// Raw byte value
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Whether control never falls through to the next instruction
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Self::Throw | Self::Jump | Self::LookupSwitch | Self::ReturnVoid | Self::ReturnValue
        )
    }

    /// Whether the opcode carries an s24 branch offset
    pub fn is_branch(self) -> bool {
        self.format() == OperandFormat::S24
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_roundtrip() {
        for &op in Opcode::ALL {
            assert_eq!(Opcode::from_u8(op.to_u8()), Some(op), "{}", op.name());
        }
    }

    #[test]
    fn test_gaps_are_not_opcodes() {
        for byte in [0x00u8, 0x0A, 0x0B, 0x22, 0x33, 0x4B, 0x9F, 0xFF] {
            assert_eq!(Opcode::from_u8(byte), None, "{byte:#x}");
        }
    }

    #[test]
    fn test_terminators() {
        assert!(Opcode::ReturnVoid.is_terminator());
        assert!(Opcode::Jump.is_terminator());
        assert!(!Opcode::IfTrue.is_terminator());
        assert!(Opcode::IfTrue.is_branch());
        assert!(!Opcode::LookupSwitch.is_branch());
    }

    #[test]
    fn test_names() {
        assert_eq!(Opcode::ConvertD.name(), "convert_d");
        assert_eq!(Opcode::GetLocal0.to_string(), "getlocal0");
        assert_eq!(Opcode::CallPropVoid.format(), OperandFormat::MultinameArgs);
    }
}
