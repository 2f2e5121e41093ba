//! Test-only class-file writer.
//!
//! Produces structurally valid class files (no `Code` attributes) so the
//! extractor and the build pipeline can be exercised without a JDK.

use std::collections::HashMap;

use crate::abi::{AccessFlags, UnitName};

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i32),
    Long(i64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
struct FieldSpec {
    flags: AccessFlags,
    name: String,
    descriptor: String,
    value: Option<Literal>,
}

#[derive(Debug, Clone, PartialEq)]
struct MethodSpec {
    flags: AccessFlags,
    name: String,
    descriptor: String,
    exceptions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassSpec {
    name: String,
    flags: AccessFlags,
    super_name: Option<String>,
    interfaces: Vec<String>,
    fields: Vec<FieldSpec>,
    methods: Vec<MethodSpec>,
    references: Vec<String>,
    source_file: Option<String>,
}

impl ClassSpec {
    /// A public class extending `java/lang/Object`, named by its internal name.
    pub fn new(internal_name: &str) -> Self {
        let simple = internal_name.rsplit('/').next().unwrap_or(internal_name);
        let outer = simple.split('$').next().unwrap_or(simple);
        Self {
            name: internal_name.to_string(),
            flags: AccessFlags::PUBLIC,
            super_name: Some("java/lang/Object".to_string()),
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            references: Vec::new(),
            source_file: Some(format!("{outer}.java")),
        }
    }

    pub fn unit_name(&self) -> UnitName {
        UnitName::from_internal(&self.name)
    }

    pub fn flags(mut self, flags: AccessFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn extends(mut self, super_name: &str) -> Self {
        self.super_name = Some(super_name.to_string());
        self
    }

    pub fn implements(mut self, interface: &str) -> Self {
        self.interfaces.push(interface.to_string());
        self
    }

    pub fn field(mut self, flags: AccessFlags, name: &str, descriptor: &str) -> Self {
        self.fields.push(FieldSpec {
            flags,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            value: None,
        });
        self
    }

    pub fn constant(
        mut self,
        flags: AccessFlags,
        name: &str,
        descriptor: &str,
        value: Literal,
    ) -> Self {
        self.fields.push(FieldSpec {
            flags,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            value: Some(value),
        });
        self
    }

    pub fn method(self, flags: AccessFlags, name: &str, descriptor: &str) -> Self {
        self.throwing(flags, name, descriptor, &[])
    }

    pub fn throwing(
        mut self,
        flags: AccessFlags,
        name: &str,
        descriptor: &str,
        exceptions: &[&str],
    ) -> Self {
        self.methods.push(MethodSpec {
            flags,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            exceptions: exceptions.iter().map(|e| e.to_string()).collect(),
        });
        self
    }

    /// Adds a class reference that only a method body would make.
    pub fn references(mut self, internal_name: &str) -> Self {
        self.references.push(internal_name.to_string());
        self
    }

    pub fn source_file(mut self, name: &str) -> Self {
        self.source_file = Some(name.to_string());
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut pool = PoolWriter::default();
        let mut body = Vec::new();

        let this_class = pool.class(&self.name);
        let super_class = self.super_name.as_deref().map_or(0, |s| pool.class(s));
        put_u2(&mut body, self.flags.bits());
        put_u2(&mut body, this_class);
        put_u2(&mut body, super_class);
        put_u2(&mut body, self.interfaces.len() as u16);
        for interface in &self.interfaces {
            let index = pool.class(interface);
            put_u2(&mut body, index);
        }

        put_u2(&mut body, self.fields.len() as u16);
        for field in &self.fields {
            put_u2(&mut body, field.flags.bits());
            put_u2(&mut body, pool.utf8(&field.name));
            put_u2(&mut body, pool.utf8(&field.descriptor));
            match &field.value {
                Some(value) => {
                    let value_index = pool.literal(value);
                    put_u2(&mut body, 1);
                    put_u2(&mut body, pool.utf8("ConstantValue"));
                    put_u4(&mut body, 2);
                    put_u2(&mut body, value_index);
                }
                None => put_u2(&mut body, 0),
            }
        }

        put_u2(&mut body, self.methods.len() as u16);
        for method in &self.methods {
            put_u2(&mut body, method.flags.bits());
            put_u2(&mut body, pool.utf8(&method.name));
            put_u2(&mut body, pool.utf8(&method.descriptor));
            if method.exceptions.is_empty() {
                put_u2(&mut body, 0);
                continue;
            }
            let indices: Vec<u16> = method.exceptions.iter().map(|e| pool.class(e)).collect();
            put_u2(&mut body, 1);
            put_u2(&mut body, pool.utf8("Exceptions"));
            put_u4(&mut body, 2 + 2 * indices.len() as u32);
            put_u2(&mut body, indices.len() as u16);
            for index in indices {
                put_u2(&mut body, index);
            }
        }

        for reference in &self.references {
            pool.class(reference);
        }

        match &self.source_file {
            Some(source) => {
                let source_index = pool.utf8(source);
                put_u2(&mut body, 1);
                put_u2(&mut body, pool.utf8("SourceFile"));
                put_u4(&mut body, 2);
                put_u2(&mut body, source_index);
            }
            None => put_u2(&mut body, 0),
        }

        let mut out = Vec::new();
        put_u4(&mut out, 0xCAFE_BABE);
        put_u2(&mut out, 0);
        put_u2(&mut out, 52);
        put_u2(&mut out, pool.next);
        out.extend_from_slice(&pool.bytes);
        out.extend_from_slice(&body);
        out
    }
}

struct PoolWriter {
    bytes: Vec<u8>,
    next: u16,
    utf8: HashMap<String, u16>,
    classes: HashMap<String, u16>,
}

impl Default for PoolWriter {
    fn default() -> Self {
        Self {
            bytes: Vec::new(),
            next: 1,
            utf8: HashMap::new(),
            classes: HashMap::new(),
        }
    }
}

impl PoolWriter {
    fn push(&mut self, entry: &[u8], slots: u16) -> u16 {
        let index = self.next;
        self.bytes.extend_from_slice(entry);
        self.next += slots;
        index
    }

    fn utf8(&mut self, value: &str) -> u16 {
        if let Some(index) = self.utf8.get(value) {
            return *index;
        }
        let mut entry = vec![1];
        put_u2(&mut entry, value.len() as u16);
        entry.extend_from_slice(value.as_bytes());
        let index = self.push(&entry, 1);
        self.utf8.insert(value.to_string(), index);
        index
    }

    fn class(&mut self, internal_name: &str) -> u16 {
        if let Some(index) = self.classes.get(internal_name) {
            return *index;
        }
        let name_index = self.utf8(internal_name);
        let mut entry = vec![7];
        put_u2(&mut entry, name_index);
        let index = self.push(&entry, 1);
        self.classes.insert(internal_name.to_string(), index);
        index
    }

    fn literal(&mut self, value: &Literal) -> u16 {
        match value {
            Literal::Int(v) => {
                let mut entry = vec![3];
                put_u4(&mut entry, *v as u32);
                self.push(&entry, 1)
            }
            Literal::Long(v) => {
                let mut entry = vec![5];
                entry.extend_from_slice(&v.to_be_bytes());
                self.push(&entry, 2)
            }
            Literal::Str(s) => {
                let string_index = self.utf8(s);
                let mut entry = vec![8];
                put_u2(&mut entry, string_index);
                self.push(&entry, 1)
            }
        }
    }
}

fn put_u2(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn put_u4(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}
