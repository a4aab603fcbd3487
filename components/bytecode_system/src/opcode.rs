//! Bytecode opcodes for the meow VM
//!
//! Defines the stack-based instruction set. Every opcode is a small `Copy`
//! value; operands that refer to the chunk (constants, jump targets, slots)
//! are plain indices validated by the interpreter when executed.

/// Local slot index relative to the current frame's base
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(pub u32);

/// Descriptor for a captured variable (upvalue)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UpvalueDescriptor {
    /// true if the variable is a local slot of the enclosing frame,
    /// false if it is one of the enclosing closure's own upvalues
    pub is_local: bool,
    /// Slot index (if local) or upvalue index (if not)
    pub index: u32,
}

impl UpvalueDescriptor {
    /// Create a new upvalue descriptor
    pub fn new(is_local: bool, index: u32) -> Self {
        Self { is_local, index }
    }
}

/// Bytecode opcodes for meow execution
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Opcode {
    /// Do nothing
    Nop,

    // Literals
    /// Load constant from constant pool at given index
    LoadConstant(u32),
    /// Load nil
    LoadNil,
    /// Load boolean true
    LoadTrue,
    /// Load boolean false
    LoadFalse,
    /// Load an inline number
    LoadNumber(f64),

    // Stack
    /// Discard top of stack
    Pop,
    /// Duplicate top of stack
    Dup,

    // Variables
    /// Push local slot
    LoadLocal(SlotId),
    /// Pop into local slot
    StoreLocal(SlotId),
    /// Push global named by a string constant
    LoadGlobal(u32),
    /// Pop into global named by a string constant
    StoreGlobal(u32),
    /// Push captured variable by upvalue index
    LoadUpvalue(u32),
    /// Pop into captured variable
    StoreUpvalue(u32),
    /// Close every open upvalue at or above the given slot
    CloseUpvalues(SlotId),

    // Arithmetic
    /// Add numbers or concatenate strings
    Add,
    /// Subtract top from second-top
    Sub,
    /// Multiply top two values
    Mul,
    /// Divide second-top by top
    Div,
    /// Floating point remainder
    Mod,
    /// Exponentiation (second-top ** top)
    Pow,
    /// Negate top value
    Neg,
    /// Logical NOT (invert truthiness)
    Not,

    // Bitwise (integral numbers only)
    /// Bitwise AND
    BitAnd,
    /// Bitwise OR
    BitOr,
    /// Bitwise XOR
    BitXor,
    /// Bitwise complement
    BitNot,
    /// Left shift
    ShiftLeft,
    /// Arithmetic right shift
    ShiftRight,

    // Comparison
    /// Equality
    Equal,
    /// Inequality
    NotEqual,
    /// Less than
    Less,
    /// Less than or equal
    LessEqual,
    /// Greater than
    Greater,
    /// Greater than or equal
    GreaterEqual,

    // Control flow
    /// Unconditional jump to absolute offset
    Jump(u32),
    /// Pop, jump if falsy
    JumpIfFalse(u32),
    /// Pop, jump if truthy
    JumpIfTrue(u32),

    // Calls
    /// Call the value below `argc` arguments
    Call(u8),
    /// Call reusing the current frame
    TailCall(u8),
    /// Return top of stack to the caller
    Return,
    /// Build a closure from a function constant
    Closure(u32),

    // Exceptions
    /// Pop a value and unwind to the innermost active handler
    Throw,
    /// Install a handler that resumes at the given offset with the thrown
    /// value pushed
    SetupTry(u32),
    /// Remove the innermost handler
    PopTry,

    // Collections
    /// Pop `n` values into a new array
    NewArray(u16),
    /// Pop `n` key/value pairs into a new map
    NewMap(u16),
    /// container[key]
    GetIndex,
    /// container[key] = value
    SetIndex,
    /// Array of a map's keys
    GetKeys,
    /// Array of a map's or array's values
    GetValues,
    /// Length of a string, array or map
    Len,
}

impl Opcode {
    /// Check if this opcode ends a basic block
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Opcode::Return
                | Opcode::TailCall(_)
                | Opcode::Throw
                | Opcode::Jump(_)
                | Opcode::JumpIfTrue(_)
                | Opcode::JumpIfFalse(_)
        )
    }

    /// Check if control never falls through to the next instruction
    pub fn is_unconditional_terminator(&self) -> bool {
        matches!(
            self,
            Opcode::Return | Opcode::TailCall(_) | Opcode::Throw | Opcode::Jump(_)
        )
    }

    /// Check if executing this opcode may allocate on the heap
    pub fn may_allocate(&self) -> bool {
        matches!(
            self,
            Opcode::LoadConstant(_)
                | Opcode::Add
                | Opcode::Closure(_)
                | Opcode::NewArray(_)
                | Opcode::NewMap(_)
                | Opcode::GetIndex
                | Opcode::GetKeys
                | Opcode::GetValues
        )
    }

    /// Check if this opcode is a binary arithmetic operation
    pub fn is_binary_arithmetic(&self) -> bool {
        matches!(
            self,
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod | Opcode::Pow
        )
    }

    /// Check if this opcode compares two values and pushes a bool
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Opcode::Equal
                | Opcode::NotEqual
                | Opcode::Less
                | Opcode::LessEqual
                | Opcode::Greater
                | Opcode::GreaterEqual
        )
    }

    /// Absolute jump target, if this is a jump
    pub fn jump_target(&self) -> Option<usize> {
        match self {
            Opcode::Jump(t) | Opcode::JumpIfFalse(t) | Opcode::JumpIfTrue(t) => Some(*t as usize),
            _ => None,
        }
    }

    /// Number of operand stack values consumed and produced.
    ///
    /// # Examples
    ///
    /// ```
    /// use bytecode_system::Opcode;
    ///
    /// assert_eq!(Opcode::Add.stack_effect(), (2, 1));
    /// assert_eq!(Opcode::Call(2).stack_effect(), (3, 1));
    /// ```
    pub fn stack_effect(&self) -> (usize, usize) {
        match self {
            Opcode::Nop
            | Opcode::Jump(_)
            | Opcode::CloseUpvalues(_)
            | Opcode::SetupTry(_)
            | Opcode::PopTry => (0, 0),
            Opcode::LoadConstant(_)
            | Opcode::LoadNil
            | Opcode::LoadTrue
            | Opcode::LoadFalse
            | Opcode::LoadNumber(_)
            | Opcode::LoadLocal(_)
            | Opcode::LoadGlobal(_)
            | Opcode::LoadUpvalue(_)
            | Opcode::Closure(_) => (0, 1),
            Opcode::Pop
            | Opcode::StoreLocal(_)
            | Opcode::StoreGlobal(_)
            | Opcode::StoreUpvalue(_)
            | Opcode::JumpIfFalse(_)
            | Opcode::JumpIfTrue(_)
            | Opcode::Throw => (1, 0),
            Opcode::Dup => (1, 2),
            Opcode::Neg
            | Opcode::Not
            | Opcode::BitNot
            | Opcode::GetKeys
            | Opcode::GetValues
            | Opcode::Len => (1, 1),
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Mod
            | Opcode::Pow
            | Opcode::BitAnd
            | Opcode::BitOr
            | Opcode::BitXor
            | Opcode::ShiftLeft
            | Opcode::ShiftRight
            | Opcode::Equal
            | Opcode::NotEqual
            | Opcode::Less
            | Opcode::LessEqual
            | Opcode::Greater
            | Opcode::GreaterEqual
            | Opcode::GetIndex => (2, 1),
            Opcode::SetIndex => (3, 0),
            Opcode::Call(argc) | Opcode::TailCall(argc) => (*argc as usize + 1, 1),
            Opcode::Return => (1, 0),
            Opcode::NewArray(n) => (*n as usize, 1),
            Opcode::NewMap(n) => (*n as usize * 2, 1),
        }
    }

    /// Mnemonic used in listings
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Opcode::Nop => "NOP",
            Opcode::LoadConstant(_) => "LOAD_CONST",
            Opcode::LoadNil => "LOAD_NIL",
            Opcode::LoadTrue => "LOAD_TRUE",
            Opcode::LoadFalse => "LOAD_FALSE",
            Opcode::LoadNumber(_) => "LOAD_NUMBER",
            Opcode::Pop => "POP",
            Opcode::Dup => "DUP",
            Opcode::LoadLocal(_) => "LOAD_LOCAL",
            Opcode::StoreLocal(_) => "STORE_LOCAL",
            Opcode::LoadGlobal(_) => "GET_GLOBAL",
            Opcode::StoreGlobal(_) => "SET_GLOBAL",
            Opcode::LoadUpvalue(_) => "GET_UPVALUE",
            Opcode::StoreUpvalue(_) => "SET_UPVALUE",
            Opcode::CloseUpvalues(_) => "CLOSE_UPVALUES",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Mod => "MOD",
            Opcode::Pow => "POW",
            Opcode::Neg => "NEG",
            Opcode::Not => "NOT",
            Opcode::BitAnd => "BIT_AND",
            Opcode::BitOr => "BIT_OR",
            Opcode::BitXor => "BIT_XOR",
            Opcode::BitNot => "BIT_NOT",
            Opcode::ShiftLeft => "LSHIFT",
            Opcode::ShiftRight => "RSHIFT",
            Opcode::Equal => "EQ",
            Opcode::NotEqual => "NEQ",
            Opcode::Less => "LT",
            Opcode::LessEqual => "LE",
            Opcode::Greater => "GT",
            Opcode::GreaterEqual => "GE",
            Opcode::Jump(_) => "JUMP",
            Opcode::JumpIfFalse(_) => "JUMP_IF_FALSE",
            Opcode::JumpIfTrue(_) => "JUMP_IF_TRUE",
            Opcode::Call(_) => "CALL",
            Opcode::TailCall(_) => "TAIL_CALL",
            Opcode::Return => "RETURN",
            Opcode::Closure(_) => "CLOSURE",
            Opcode::Throw => "THROW",
            Opcode::SetupTry(_) => "SETUP_TRY",
            Opcode::PopTry => "POP_TRY",
            Opcode::NewArray(_) => "NEW_ARRAY",
            Opcode::NewMap(_) => "NEW_HASH",
            Opcode::GetIndex => "GET_INDEX",
            Opcode::SetIndex => "SET_INDEX",
            Opcode::GetKeys => "GET_KEYS",
            Opcode::GetValues => "GET_VALUES",
            Opcode::Len => "LEN",
        }
    }
}
