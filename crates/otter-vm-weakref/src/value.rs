//! Values observed by weak references and finalization registries.
//!
//! Only the shapes this crate needs are modelled: managed cells are identified
//! by their zone and current address, and everything else is an opaque
//! payload that is carried around (held values, host-defined data).

use std::fmt;
use std::rc::Rc;

use crate::zone::ZoneId;

/// Address of a managed cell.
///
/// The zone is part of the address: a cell never changes zone, but compaction
/// may give it a new `addr` within the same zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellRef {
    zone: ZoneId,
    addr: u64,
}

impl CellRef {
    /// Create a cell reference
    pub const fn new(zone: ZoneId, addr: u64) -> Self {
        Self { zone, addr }
    }

    /// Zone owning the cell
    pub const fn zone(self) -> ZoneId {
        self.zone
    }

    /// Current address of the cell inside its zone
    pub const fn addr(self) -> u64 {
        self.addr
    }

    /// The same cell at a new address (after compaction)
    pub const fn moved_to(self, addr: u64) -> Self {
        Self {
            zone: self.zone,
            addr,
        }
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:#x}", self.zone, self.addr)
    }
}

/// How a symbol was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    /// `Symbol()`, has identity
    Unique,
    /// `Symbol.for()`, shared through the registry and without identity
    Registered,
    /// `Symbol.iterator` and friends: permanent and shared
    WellKnown,
}

/// A symbol cell together with its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolRef {
    cell: CellRef,
    kind: SymbolKind,
}

impl SymbolRef {
    /// Create a symbol reference
    pub const fn new(cell: CellRef, kind: SymbolKind) -> Self {
        Self { cell, kind }
    }

    /// The symbol's cell
    pub const fn cell(self) -> CellRef {
        self.cell
    }

    /// The symbol's kind
    pub const fn kind(self) -> SymbolKind {
        self.kind
    }
}

/// A script value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// `undefined`
    #[default]
    Undefined,
    /// `null`
    Null,
    /// A boolean
    Boolean(bool),
    /// A number
    Number(f64),
    /// A string (compared by contents)
    String(Rc<str>),
    /// A symbol
    Symbol(SymbolRef),
    /// An object
    Object(CellRef),
}

impl Value {
    /// Create undefined value
    pub const fn undefined() -> Self {
        Self::Undefined
    }

    /// Create an object value
    pub const fn object(cell: CellRef) -> Self {
        Self::Object(cell)
    }

    /// Create a symbol value
    pub const fn symbol(cell: CellRef, kind: SymbolKind) -> Self {
        Self::Symbol(SymbolRef::new(cell, kind))
    }

    /// Create a string value
    pub fn string(s: &str) -> Self {
        Self::String(Rc::from(s))
    }

    /// Create a number value
    pub const fn number(n: f64) -> Self {
        Self::Number(n)
    }

    /// Check if undefined
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Managed cell behind this value, if any
    pub fn as_cell(&self) -> Option<CellRef> {
        match self {
            Self::Object(cell) => Some(*cell),
            Self::Symbol(sym) => Some(sym.cell()),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Null => f.write_str("null"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "\"{s}\""),
            Self::Symbol(sym) => write!(f, "Symbol({})", sym.cell()),
            Self::Object(cell) => write!(f, "[object {cell}]"),
        }
    }
}

/// A value that can be held weakly, tagged by kind.
///
/// This is what weak references and finalization records store for their
/// target: the raw cell plus enough information to rebuild the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WeakTarget {
    /// An object
    Object(CellRef),
    /// A unique or well-known symbol
    Symbol(SymbolRef),
}

impl WeakTarget {
    /// The target's cell
    pub const fn cell(self) -> CellRef {
        match self {
            Self::Object(cell) => cell,
            Self::Symbol(sym) => sym.cell(),
        }
    }

    /// Zone whose observers track this target
    pub const fn zone(self) -> ZoneId {
        self.cell().zone()
    }

    /// Well-known symbols are never collected
    pub const fn is_permanent(self) -> bool {
        matches!(
            self,
            Self::Symbol(SymbolRef {
                kind: SymbolKind::WellKnown,
                ..
            })
        )
    }

    /// The same target at a new cell address
    pub const fn with_cell(self, cell: CellRef) -> Self {
        match self {
            Self::Object(_) => Self::Object(cell),
            Self::Symbol(sym) => Self::Symbol(SymbolRef::new(cell, sym.kind())),
        }
    }

    /// Rebuild the script value
    pub fn to_value(self) -> Value {
        match self {
            Self::Object(cell) => Value::Object(cell),
            Self::Symbol(sym) => Value::Symbol(sym),
        }
    }
}

impl fmt::Display for WeakTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.to_value().fmt(f)
    }
}

/// Returns the weak target for `v` if it is suitable for use as a weak
/// reference: any object, or a symbol that was not created by `Symbol.for`.
pub fn can_be_held_weakly(v: &Value) -> Option<WeakTarget> {
    match v {
        Value::Object(cell) => Some(WeakTarget::Object(*cell)),
        Value::Symbol(sym) if sym.kind() != SymbolKind::Registered => {
            Some(WeakTarget::Symbol(*sym))
        }
        _ => None,
    }
}
