// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Value types and method descriptors

use crate::error::{WeaveError, WeaveResult};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const STRING_CLASS: &str = "java/lang/String";
pub const OBJECT_CLASS: &str = "java/lang/Object";
/// Type of the `null` constant during analysis; merges into any reference type
pub const NULL_CLASS: &str = "null";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Object(String),
    Array(Box<Type>),
}

impl Type {
    pub fn string() -> Self {
        Type::Object(STRING_CLASS.to_string())
    }

    pub fn array_of(element: Type) -> Self {
        Type::Array(Box::new(element))
    }

    /// Scalars whose provenance is tracked
    pub fn is_tracked_scalar(&self) -> bool {
        matches!(self, Type::Byte | Type::Char)
    }

    /// Element types of arrays whose element reads are tracked
    pub fn is_tracked_element(&self) -> bool {
        matches!(self, Type::Byte | Type::Char | Type::Int)
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Type::Object(_) | Type::Array(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Type::Object(name) if name == STRING_CLASS)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Type::Object(name) if name == NULL_CLASS)
    }

    pub fn descriptor(&self) -> String {
        match self {
            Type::Void => "V".to_string(),
            Type::Boolean => "Z".to_string(),
            Type::Byte => "B".to_string(),
            Type::Char => "C".to_string(),
            Type::Short => "S".to_string(),
            Type::Int => "I".to_string(),
            Type::Long => "J".to_string(),
            Type::Float => "F".to_string(),
            Type::Double => "D".to_string(),
            Type::Object(name) => format!("L{name};"),
            Type::Array(element) => format!("[{}", element.descriptor()),
        }
    }

    /// Parses one type at the start of `input`, returning it and the rest
    fn parse_prefix<'a>(input: &'a str, whole: &str) -> WeaveResult<(Type, &'a str)> {
        let invalid = |reason: &str| WeaveError::InvalidDescriptor {
            descriptor: whole.to_string(),
            reason: reason.to_string(),
        };
        let mut chars = input.chars();
        let first = chars.next().ok_or_else(|| invalid("unexpected end"))?;
        let rest = chars.as_str();
        let ty = match first {
            'V' => Type::Void,
            'Z' => Type::Boolean,
            'B' => Type::Byte,
            'C' => Type::Char,
            'S' => Type::Short,
            'I' => Type::Int,
            'J' => Type::Long,
            'F' => Type::Float,
            'D' => Type::Double,
            'L' => {
                let end = rest.find(';').ok_or_else(|| invalid("unterminated class name"))?;
                if end == 0 {
                    return Err(invalid("empty class name"));
                }
                return Ok((Type::Object(rest[..end].to_string()), &rest[end + 1..]));
            }
            '[' => {
                let (element, rest) = Self::parse_prefix(rest, whole)?;
                if element == Type::Void {
                    return Err(invalid("array of void"));
                }
                return Ok((Type::array_of(element), rest));
            }
            other => return Err(invalid(&format!("unknown type character '{other}'"))),
        };
        Ok((ty, rest))
    }

    pub fn parse(descriptor: &str) -> WeaveResult<Type> {
        let (ty, rest) = Self::parse_prefix(descriptor, descriptor)?;
        if !rest.is_empty() {
            return Err(WeaveError::InvalidDescriptor {
                descriptor: descriptor.to_string(),
                reason: format!("trailing '{rest}'"),
            });
        }
        Ok(ty)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => f.write_str("void"),
            Type::Boolean => f.write_str("boolean"),
            Type::Byte => f.write_str("byte"),
            Type::Char => f.write_str("char"),
            Type::Short => f.write_str("short"),
            Type::Int => f.write_str("int"),
            Type::Long => f.write_str("long"),
            Type::Float => f.write_str("float"),
            Type::Double => f.write_str("double"),
            Type::Object(name) => f.write_str(&name.replace('/', ".")),
            Type::Array(element) => write!(f, "{element}[]"),
        }
    }
}

impl Serialize for Type {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.descriptor())
    }
}

impl<'de> Deserialize<'de> for Type {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Type::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// Parameter and return types of a method, `(params)ret` in text form
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDesc {
    pub params: Vec<Type>,
    pub ret: Type,
}

impl MethodDesc {
    pub fn new(params: Vec<Type>, ret: Type) -> Self {
        Self { params, ret }
    }

    pub fn parse(descriptor: &str) -> WeaveResult<Self> {
        let invalid = |reason: &str| WeaveError::InvalidDescriptor {
            descriptor: descriptor.to_string(),
            reason: reason.to_string(),
        };
        let mut rest = descriptor.strip_prefix('(').ok_or_else(|| invalid("missing '('"))?;
        let mut params = Vec::new();
        loop {
            if let Some(after) = rest.strip_prefix(')') {
                rest = after;
                break;
            }
            let (param, after) = Type::parse_prefix(rest, descriptor)?;
            if param == Type::Void {
                return Err(invalid("void parameter"));
            }
            params.push(param);
            rest = after;
        }
        let ret = Type::parse(rest).map_err(|_| invalid("invalid return type"))?;
        Ok(Self { params, ret })
    }

    pub fn descriptor(&self) -> String {
        let params: String = self.params.iter().map(Type::descriptor).collect();
        format!("({params}){}", self.ret.descriptor())
    }

    /// True if the descriptor mentions an array or a buffer type anywhere
    pub fn mentions_buffer(&self) -> bool {
        let descriptor = self.descriptor();
        descriptor.contains('[') || descriptor.contains("Buffer")
    }
}

impl fmt::Display for MethodDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.descriptor())
    }
}

impl Serialize for MethodDesc {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.descriptor())
    }
}

impl<'de> Deserialize<'de> for MethodDesc {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        MethodDesc::parse(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_method_descriptor() {
        let desc = MethodDesc::parse("(I[CLjava/lang/String;)B").unwrap();
        assert_eq!(desc.params, vec![Type::Int, Type::array_of(Type::Char), Type::string()]);
        assert_eq!(desc.ret, Type::Byte);
        assert_eq!(desc.descriptor(), "(I[CLjava/lang/String;)B");
    }

    #[test]
    fn test_reject_malformed_descriptors() {
        for bad in ["I)V", "(I", "(Q)V", "(Ljava/lang/String)V", "(V)V", "()", "()II", "([V)V"] {
            assert!(MethodDesc::parse(bad).is_err(), "accepted {bad}");
        }
    }

    #[test]
    fn test_display_is_readable() {
        assert_eq!(Type::array_of(Type::Char).to_string(), "char[]");
        assert_eq!(Type::string().to_string(), "java.lang.String");
    }

    #[test]
    fn test_buffer_mentions() {
        assert!(MethodDesc::parse("([B)I").unwrap().mentions_buffer());
        assert!(MethodDesc::parse("(Ljava/nio/ByteBuffer;)I").unwrap().mentions_buffer());
        assert!(!MethodDesc::parse("()I").unwrap().mentions_buffer());
    }
}
