//! JVM field and method descriptors (JVMS §4.3).

use std::fmt;

use crate::abi::UnitName;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid descriptor `{0}`")]
pub struct DescriptorError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BaseType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
    Void,
}

impl BaseType {
    fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            b'B' => Self::Byte,
            b'C' => Self::Char,
            b'D' => Self::Double,
            b'F' => Self::Float,
            b'I' => Self::Int,
            b'J' => Self::Long,
            b'S' => Self::Short,
            b'Z' => Self::Boolean,
            b'V' => Self::Void,
            _ => return None,
        })
    }

    fn keyword(self) -> &'static str {
        match self {
            Self::Byte => "byte",
            Self::Char => "char",
            Self::Double => "double",
            Self::Float => "float",
            Self::Int => "int",
            Self::Long => "long",
            Self::Short => "short",
            Self::Boolean => "boolean",
            Self::Void => "void",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElementType {
    Primitive(BaseType),
    Object(UnitName),
}

/// A field type, parameter type or return type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeDescriptor {
    pub element: ElementType,
    pub dimensions: u8,
}

impl TypeDescriptor {
    pub fn object(name: UnitName) -> Self {
        Self {
            element: ElementType::Object(name),
            dimensions: 0,
        }
    }

    pub fn primitive(base: BaseType) -> Self {
        Self {
            element: ElementType::Primitive(base),
            dimensions: 0,
        }
    }

    /// Parses a complete field descriptor such as `[Ljava/lang/String;`.
    pub fn parse_field(descriptor: &str) -> Result<Self, DescriptorError> {
        let bytes = descriptor.as_bytes();
        let mut pos = 0;
        let parsed = parse_type(bytes, &mut pos, false)
            .ok_or_else(|| DescriptorError(descriptor.to_string()))?;
        if pos != bytes.len() {
            return Err(DescriptorError(descriptor.to_string()));
        }
        Ok(parsed)
    }

    /// Interprets the name stored in a `CONSTANT_Class` entry. Array classes
    /// are stored as descriptors, everything else as an internal name.
    pub fn from_class_entry(internal_name: &str) -> Result<Self, DescriptorError> {
        if internal_name.starts_with('[') {
            return Self::parse_field(internal_name);
        }
        if internal_name.is_empty() {
            return Err(DescriptorError(internal_name.to_string()));
        }
        Ok(Self::object(UnitName::from_internal(internal_name)))
    }

    pub fn is_array(&self) -> bool {
        self.dimensions > 0
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self.element, ElementType::Primitive(_))
    }

    /// The referenced class, if the element type is a class at all.
    pub fn unit_name(&self) -> Option<&UnitName> {
        match &self.element {
            ElementType::Object(name) => Some(name),
            ElementType::Primitive(_) => None,
        }
    }

    /// The referenced class when it takes part in dependency tracking:
    /// primitives and runtime-library classes do not.
    pub fn tracked_unit(&self) -> Option<&UnitName> {
        self.unit_name().filter(|name| !name.is_runtime_library())
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.element {
            ElementType::Primitive(base) => f.write_str(base.keyword())?,
            ElementType::Object(name) => write!(f, "{name}")?,
        }
        for _ in 0..self.dimensions {
            f.write_str("[]")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    pub parameters: Vec<TypeDescriptor>,
    pub return_type: TypeDescriptor,
}

impl MethodDescriptor {
    /// Parses a method descriptor such as `(I[JLp/A;)V`.
    pub fn parse(descriptor: &str) -> Result<Self, DescriptorError> {
        let err = || DescriptorError(descriptor.to_string());
        let bytes = descriptor.as_bytes();
        if bytes.first() != Some(&b'(') {
            return Err(err());
        }

        let mut pos = 1;
        let mut parameters = Vec::new();
        while bytes.get(pos) != Some(&b')') {
            if pos >= bytes.len() {
                return Err(err());
            }
            parameters.push(parse_type(bytes, &mut pos, false).ok_or_else(err)?);
        }
        pos += 1;

        let return_type = parse_type(bytes, &mut pos, true).ok_or_else(err)?;
        if pos != bytes.len() {
            return Err(err());
        }

        Ok(Self {
            parameters,
            return_type,
        })
    }
}

fn parse_type(bytes: &[u8], pos: &mut usize, allow_void: bool) -> Option<TypeDescriptor> {
    let mut dimensions: u8 = 0;
    while bytes.get(*pos) == Some(&b'[') {
        dimensions = dimensions.checked_add(1)?;
        *pos += 1;
    }

    let code = *bytes.get(*pos)?;
    *pos += 1;

    let element = if code == b'L' {
        let start = *pos;
        let len = bytes[start..].iter().position(|b| *b == b';')?;
        if len == 0 {
            return None;
        }
        *pos = start + len + 1;
        let internal = std::str::from_utf8(&bytes[start..start + len]).ok()?;
        ElementType::Object(UnitName::from_internal(internal))
    } else {
        let base = BaseType::from_code(code)?;
        if base == BaseType::Void && (!allow_void || dimensions > 0) {
            return None;
        }
        ElementType::Primitive(base)
    };

    Some(TypeDescriptor {
        element,
        dimensions,
    })
}
