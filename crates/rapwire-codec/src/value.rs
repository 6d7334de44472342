//! The decoded value tree.

/// A wire value: a typed scalar or a recursive pair structure.
///
/// Values are owned trees. Cyclic or shared substructure cannot be
/// represented, which matches the wire format: decoding always produces a
/// finite tree and encoding walks one.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Byte(u8),
    Char(char),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    Str(String),
    Symbol(String),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
    Blob(Vec<u8>),
    /// Out-of-band diagnostic message, decoded like any other value so
    /// errors can travel as ordinary payloads.
    Diagnostic(String),
    /// A cons cell. Proper lists are chains of pairs ending in `Null`.
    Pair(Box<Value>, Box<Value>),
}

impl Value {
    /// Build a cons cell.
    pub fn cons(car: Value, cdr: Value) -> Value {
        Value::Pair(Box::new(car), Box::new(cdr))
    }

    /// Build a proper list (a pair chain ending in `Null`).
    pub fn list<I: IntoIterator<Item = Value>>(items: I) -> Value {
        let items: Vec<Value> = items.into_iter().collect();
        let mut out = Value::Null;
        for item in items.into_iter().rev() {
            out = Value::cons(item, out);
        }
        out
    }

    /// The head of a pair, if this is one.
    pub fn car(&self) -> Option<&Value> {
        match self {
            Value::Pair(car, _) => Some(car),
            _ => None,
        }
    }

    /// The tail of a pair, if this is one.
    pub fn cdr(&self) -> Option<&Value> {
        match self {
            Value::Pair(_, cdr) => Some(cdr),
            _ => None,
        }
    }

    /// True if this value is a proper list (`Null` or a pair chain ending
    /// in `Null`).
    pub fn is_list(&self) -> bool {
        let mut cur = self;
        loop {
            match cur {
                Value::Null => return true,
                Value::Pair(_, cdr) => cur = cdr,
                _ => return false,
            }
        }
    }
}
