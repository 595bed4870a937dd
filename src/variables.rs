use std::{collections::HashMap, fmt};

// Text used when a variable is missing, matching what the established
// output format has always carried for absent tags.
pub const ABSENT: &str = "<nil>";

/// A loosely typed scalar as reported by the UPS server.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{}", s),
            Value::Int(i) => write!(f, "{}", i),
            Value::UInt(u) => write!(f, "{}", u),
            Value::Float(x) => write!(f, "{}", x),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::Str(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Value {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Value {
        Value::Float(x)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub value: Value,
}

impl Variable {
    pub fn new(name: &str, value: impl Into<Value>) -> Variable {
        Variable {
            name: name.to_string(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub name: String,
    pub variables: Vec<Variable>,
}

#[derive(Debug, Default, Clone)]
pub struct Variables {
    map: HashMap<String, Value>,
}

impl Variables {
    /// Builds the lookup from the list the server sent. Later duplicates
    /// replace earlier ones.
    pub fn normalize(variables: Vec<Variable>) -> Variables {
        let mut map = HashMap::with_capacity(variables.len());
        for variable in variables {
            map.insert(variable.name, variable.value);
        }
        Variables { map }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.map.get(name)
    }

    pub fn text(&self, name: &str) -> String {
        match self.get(name) {
            Some(value) => value.to_string(),
            None => ABSENT.to_string(),
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.map.len()
    }
}
