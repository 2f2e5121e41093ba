//! Class-file parsing and ABI extraction.
//!
//! Reads the JVM class file format (JVMS §4) far enough to recover the
//! structural declaration of a class and every type it references. Method
//! bodies are never decoded: references made from code are picked up by
//! scanning the constant pool instead.

use sha2::{Digest, Sha256};

use crate::abi::{
    AccessFlags, ClassAbi, ClassVersion, ConstantAbi, DependencySets, FieldAbi, MethodAbi,
    MethodSignature, UnitName,
};
use crate::descriptor::{DescriptorError, MethodDescriptor, TypeDescriptor};

const MAGIC: u32 = 0xCAFE_BABE;

#[derive(Debug, thiserror::Error)]
pub enum ClassFileError {
    #[error("unexpected end of data at offset {offset} (wanted {wanted} bytes)")]
    UnexpectedEof { offset: usize, wanted: usize },

    #[error("bad magic number {0:#010x}")]
    BadMagic(u32),

    #[error("unknown constant pool tag {tag} at index {index}")]
    UnknownConstantTag { tag: u8, index: u16 },

    #[error("constant pool index {index} is not a {expected}")]
    BadConstantIndex { index: u16, expected: &'static str },

    #[error("two-slot constant at index {index} runs past the end of the constant pool")]
    WideConstantAtEnd { index: u16 },

    #[error("constant pool entry {index} is not valid modified UTF-8")]
    InvalidUtf8 { index: u16 },

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error("{0} trailing bytes after class file")]
    TrailingBytes(usize),
}

type ParseResult<T> = Result<T, ClassFileError>;

#[derive(Debug, Clone, PartialEq)]
enum Constant {
    /// Index 0 and the slot following a long or double.
    Unusable,
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class(u16),
    String(u16),
    MemberRef,
    NameAndType { descriptor: u16 },
    MethodHandle,
    MethodType(u16),
    Dynamic,
    Module,
    Package,
}

#[derive(Debug)]
struct ConstantPool {
    entries: Vec<Constant>,
}

impl ConstantPool {
    fn get(&self, index: u16, expected: &'static str) -> ParseResult<&Constant> {
        match self.entries.get(usize::from(index)) {
            Some(Constant::Unusable) | None => {
                Err(ClassFileError::BadConstantIndex { index, expected })
            }
            Some(c) => Ok(c),
        }
    }

    fn utf8(&self, index: u16) -> ParseResult<&str> {
        match self.get(index, "Utf8")? {
            Constant::Utf8(s) => Ok(s),
            _ => Err(ClassFileError::BadConstantIndex {
                index,
                expected: "Utf8",
            }),
        }
    }

    fn class_name(&self, index: u16) -> ParseResult<&str> {
        match self.get(index, "Class")? {
            Constant::Class(name) => self.utf8(*name),
            _ => Err(ClassFileError::BadConstantIndex {
                index,
                expected: "Class",
            }),
        }
    }

    /// Textual form of a `ConstantValue` literal.
    fn literal(&self, index: u16) -> ParseResult<String> {
        Ok(match self.get(index, "literal")? {
            Constant::Integer(v) => v.to_string(),
            Constant::Float(v) => v.to_string(),
            Constant::Long(v) => v.to_string(),
            Constant::Double(v) => v.to_string(),
            Constant::String(s) => self.utf8(*s)?.to_string(),
            _ => {
                return Err(ClassFileError::BadConstantIndex {
                    index,
                    expected: "literal",
                });
            }
        })
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> ParseResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(ClassFileError::UnexpectedEof {
                offset: self.pos,
                wanted: n,
            })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u1(&mut self) -> ParseResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u2(&mut self) -> ParseResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u4(&mut self) -> ParseResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u8(&mut self) -> ParseResult<u64> {
        let hi = u64::from(self.u4()?);
        let lo = u64::from(self.u4()?);
        Ok((hi << 32) | lo)
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }
}

struct Attribute<'a> {
    name: u16,
    data: &'a [u8],
}

struct Member<'a> {
    flags: AccessFlags,
    name: u16,
    descriptor: u16,
    attributes: Vec<Attribute<'a>>,
}

struct ClassFile<'a> {
    version: ClassVersion,
    pool: ConstantPool,
    flags: AccessFlags,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
    fields: Vec<Member<'a>>,
    methods: Vec<Member<'a>>,
    attributes: Vec<Attribute<'a>>,
}

impl<'a> ClassFile<'a> {
    fn parse(bytes: &'a [u8]) -> ParseResult<Self> {
        let mut r = Reader::new(bytes);
        let magic = r.u4()?;
        if magic != MAGIC {
            return Err(ClassFileError::BadMagic(magic));
        }
        let minor = r.u2()?;
        let major = r.u2()?;
        let pool = read_constant_pool(&mut r)?;
        let flags = AccessFlags::from_bits_retain(r.u2()?);
        let this_class = r.u2()?;
        let super_class = r.u2()?;

        let interface_count = r.u2()?;
        let mut interfaces = Vec::with_capacity(usize::from(interface_count));
        for _ in 0..interface_count {
            interfaces.push(r.u2()?);
        }

        let fields = read_members(&mut r)?;
        let methods = read_members(&mut r)?;
        let attributes = read_attributes(&mut r)?;
        if r.remaining() > 0 {
            return Err(ClassFileError::TrailingBytes(r.remaining()));
        }

        Ok(Self {
            version: ClassVersion { major, minor },
            pool,
            flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    fn attribute(&self, attributes: &[Attribute<'a>], name: &str) -> Option<&'a [u8]> {
        attributes
            .iter()
            .find(|a| self.pool.utf8(a.name).is_ok_and(|n| n == name))
            .map(|a| a.data)
    }

    fn source_file(&self) -> ParseResult<Option<&str>> {
        match self.attribute(&self.attributes, "SourceFile") {
            Some(data) => Ok(Some(self.pool.utf8(Reader::new(data).u2()?)?)),
            None => Ok(None),
        }
    }
}

fn read_constant_pool(r: &mut Reader<'_>) -> ParseResult<ConstantPool> {
    let count = r.u2()?;
    let mut entries = Vec::with_capacity(usize::from(count));
    entries.push(Constant::Unusable);

    let mut index: u16 = 1;
    while index < count {
        let tag = r.u1()?;
        let constant = match tag {
            1 => {
                let len = r.u2()?;
                let raw = r.take(usize::from(len))?;
                Constant::Utf8(
                    decode_modified_utf8(raw).ok_or(ClassFileError::InvalidUtf8 { index })?,
                )
            }
            3 => Constant::Integer(r.u4()? as i32),
            4 => Constant::Float(f32::from_bits(r.u4()?)),
            5 => Constant::Long(r.u8()? as i64),
            6 => Constant::Double(f64::from_bits(r.u8()?)),
            7 => Constant::Class(r.u2()?),
            8 => Constant::String(r.u2()?),
            9..=11 => {
                r.take(4)?;
                Constant::MemberRef
            }
            12 => {
                let _name = r.u2()?;
                Constant::NameAndType {
                    descriptor: r.u2()?,
                }
            }
            15 => {
                r.take(3)?;
                Constant::MethodHandle
            }
            16 => Constant::MethodType(r.u2()?),
            17 | 18 => {
                r.take(4)?;
                Constant::Dynamic
            }
            19 => {
                r.take(2)?;
                Constant::Module
            }
            20 => {
                r.take(2)?;
                Constant::Package
            }
            _ => return Err(ClassFileError::UnknownConstantTag { tag, index }),
        };

        let wide = matches!(constant, Constant::Long(_) | Constant::Double(_));
        // index < count, so neither increment below can overflow
        if wide && index + 1 >= count {
            return Err(ClassFileError::WideConstantAtEnd { index });
        }
        entries.push(constant);
        index += 1;
        if wide {
            entries.push(Constant::Unusable);
            index += 1;
        }
    }

    Ok(ConstantPool { entries })
}

fn read_members<'a>(r: &mut Reader<'a>) -> ParseResult<Vec<Member<'a>>> {
    let count = r.u2()?;
    let mut members = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        members.push(Member {
            flags: AccessFlags::from_bits_retain(r.u2()?),
            name: r.u2()?,
            descriptor: r.u2()?,
            attributes: read_attributes(r)?,
        });
    }
    Ok(members)
}

fn read_attributes<'a>(r: &mut Reader<'a>) -> ParseResult<Vec<Attribute<'a>>> {
    let count = r.u2()?;
    let mut attributes = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let name = r.u2()?;
        let len = r.u4()? as usize;
        attributes.push(Attribute {
            name,
            data: r.take(len)?,
        });
    }
    Ok(attributes)
}

/// Decodes the JVM's modified UTF-8: NUL is encoded as `C0 80` and
/// supplementary characters as surrogate pairs.
fn decode_modified_utf8(raw: &[u8]) -> Option<String> {
    if let Ok(s) = std::str::from_utf8(raw) {
        return Some(s.to_string());
    }

    let mut units: Vec<u16> = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let b = raw[i];
        if b & 0x80 == 0 {
            units.push(u16::from(b));
            i += 1;
        } else if b & 0xE0 == 0xC0 {
            let b2 = *raw.get(i + 1)?;
            units.push((u16::from(b & 0x1F) << 6) | u16::from(b2 & 0x3F));
            i += 2;
        } else if b & 0xF0 == 0xE0 {
            let b2 = *raw.get(i + 1)?;
            let b3 = *raw.get(i + 2)?;
            units.push(
                (u16::from(b & 0x0F) << 12) | (u16::from(b2 & 0x3F) << 6) | u16::from(b3 & 0x3F),
            );
            i += 3;
        } else {
            return None;
        }
    }
    String::from_utf16(&units).ok()
}

/// Short fingerprint of a constant's textual value.
pub fn fingerprint(text: &str) -> u64 {
    let digest = Sha256::digest(text.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}

/// Builds the ABI model of one class file.
pub fn extract(bytes: &[u8]) -> Result<ClassAbi, ClassFileError> {
    let cf = ClassFile::parse(bytes)?;
    let pool = &cf.pool;

    let name = UnitName::from_internal(pool.class_name(cf.this_class)?);
    let super_class = match cf.super_class {
        0 => None,
        index => Some(UnitName::from_internal(pool.class_name(index)?)),
    };
    let interfaces = cf
        .interfaces
        .iter()
        .map(|i| pool.class_name(*i).map(UnitName::from_internal))
        .collect::<ParseResult<Vec<_>>>()?;

    let mut deps = DependencySets::default();
    for supertype in super_class.iter().chain(interfaces.iter()) {
        deps.declared(cf.flags, &TypeDescriptor::object(supertype.clone()));
    }

    let mut fields = Vec::with_capacity(cf.fields.len());
    let mut constants = Vec::new();
    for member in &cf.fields {
        let field_name = pool.utf8(member.name)?.to_string();
        let field_type = TypeDescriptor::parse_field(pool.utf8(member.descriptor)?)?;
        deps.declared(member.flags, &field_type);

        let is_exposed_constant = member.flags.contains(AccessFlags::STATIC | AccessFlags::FINAL)
            && !member.flags.is_private();
        if is_exposed_constant
            && let Some(data) = cf.attribute(&member.attributes, "ConstantValue")
        {
            let literal = pool.literal(Reader::new(data).u2()?)?;
            constants.push(ConstantAbi {
                name: field_name.clone(),
                fingerprint: fingerprint(&literal),
            });
        }

        fields.push(FieldAbi {
            flags: member.flags,
            name: field_name,
            field_type,
        });
    }

    let mut methods = Vec::with_capacity(cf.methods.len());
    for member in &cf.methods {
        let method_name = pool.utf8(member.name)?.to_string();
        let descriptor = MethodDescriptor::parse(pool.utf8(member.descriptor)?)?;
        for ty in descriptor
            .parameters
            .iter()
            .chain(std::iter::once(&descriptor.return_type))
        {
            deps.declared(member.flags, ty);
        }

        let mut exceptions = std::collections::BTreeSet::new();
        if let Some(data) = cf.attribute(&member.attributes, "Exceptions") {
            let mut r = Reader::new(data);
            for _ in 0..r.u2()? {
                let exception = UnitName::from_internal(pool.class_name(r.u2()?)?);
                deps.declared(member.flags, &TypeDescriptor::object(exception.clone()));
                exceptions.insert(exception);
            }
        }

        methods.push(MethodAbi {
            flags: member.flags,
            signature: MethodSignature {
                name: method_name,
                parameters: descriptor.parameters,
                return_type: descriptor.return_type,
            },
            exceptions,
        });
    }

    scan_pool_references(pool, &mut deps)?;
    let (exposed, internal) = deps.finish(&name);

    Ok(ClassAbi {
        version: cf.version,
        flags: cf.flags,
        name,
        super_class,
        interfaces,
        fields,
        methods,
        constants,
        exposed,
        internal,
    })
}

/// Records every type named anywhere in the constant pool. This is how
/// references made from method bodies are found.
fn scan_pool_references(pool: &ConstantPool, deps: &mut DependencySets) -> ParseResult<()> {
    for constant in &pool.entries {
        match constant {
            Constant::Class(name) => {
                deps.incidental(&TypeDescriptor::from_class_entry(pool.utf8(*name)?)?);
            }
            Constant::NameAndType { descriptor } | Constant::MethodType(descriptor) => {
                let descriptor = pool.utf8(*descriptor)?;
                if descriptor.starts_with('(') {
                    let method = MethodDescriptor::parse(descriptor)?;
                    for ty in method.parameters.iter().chain([&method.return_type]) {
                        deps.incidental(ty);
                    }
                } else {
                    deps.incidental(&TypeDescriptor::parse_field(descriptor)?);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Name of the class and the value of its `SourceFile` attribute.
pub fn origin(bytes: &[u8]) -> Result<(UnitName, Option<String>), ClassFileError> {
    let cf = ClassFile::parse(bytes)?;
    let name = UnitName::from_internal(cf.pool.class_name(cf.this_class)?);
    let source_file = cf.source_file()?.map(str::to_string);
    Ok((name, source_file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::AccessLevel;
    use crate::fixture::{ClassSpec, Literal};

    fn names(set: &std::collections::BTreeSet<UnitName>) -> Vec<&str> {
        set.iter().map(|n| n.as_str()).collect()
    }

    #[test]
    fn extract_reads_declaration() {
        let bytes = ClassSpec::new("org/example/Foo")
            .extends("org/example/Base")
            .implements("org/example/Api")
            .field(AccessFlags::PRIVATE, "count", "I")
            .field(AccessFlags::PUBLIC, "name", "Ljava/lang/String;")
            .method(AccessFlags::PUBLIC, "run", "(Lorg/example/Arg;[I)Lorg/example/Out;")
            .to_bytes();

        let abi = extract(&bytes).unwrap();
        assert_eq!(abi.name.as_str(), "org.example.Foo");
        assert_eq!(abi.super_class.as_ref().map(|n| n.as_str()), Some("org.example.Base"));
        assert_eq!(names(&abi.interfaces.iter().cloned().collect()), vec!["org.example.Api"]);
        assert_eq!(abi.version.major, 52);
        assert!(abi.flags.contains(AccessFlags::PUBLIC));

        assert_eq!(abi.fields.len(), 2);
        assert_eq!(abi.fields[0].access_level(), AccessLevel::Private);
        assert_eq!(abi.methods.len(), 1);
        assert_eq!(
            abi.methods[0].signature.to_string(),
            "org.example.Out run(org.example.Arg, int[])"
        );
        assert_eq!(
            names(&abi.exposed),
            vec![
                "org.example.Api",
                "org.example.Arg",
                "org.example.Base",
                "org.example.Out"
            ]
        );
        assert!(abi.internal.is_empty());
    }

    #[test]
    fn private_members_and_body_references_are_internal() {
        let bytes = ClassSpec::new("a/A")
            .field(AccessFlags::PRIVATE, "helper", "La/Helper;")
            .method(AccessFlags::PRIVATE, "make", "()La/Made;")
            .method(AccessFlags::PUBLIC, "get", "()La/Shared;")
            .field(AccessFlags::PRIVATE, "shared", "La/Shared;")
            .references("a/Body")
            .references("[La/ArrayElem;")
            .references("java/util/List")
            .to_bytes();

        let abi = extract(&bytes).unwrap();
        assert_eq!(names(&abi.exposed), vec!["a.Shared"]);
        assert_eq!(
            names(&abi.internal),
            vec!["a.ArrayElem", "a.Body", "a.Helper", "a.Made"]
        );
        assert!(!abi.internal.contains(&abi.name));
    }

    #[test]
    fn throws_clause_is_a_declared_reference() {
        let bytes = ClassSpec::new("a/A")
            .throwing(AccessFlags::PUBLIC, "open", "()V", &["a/OpenFailed"])
            .throwing(AccessFlags::PRIVATE, "close", "()V", &["a/CloseFailed"])
            .to_bytes();

        let abi = extract(&bytes).unwrap();
        assert_eq!(names(&abi.exposed), vec!["a.OpenFailed"]);
        assert_eq!(names(&abi.internal), vec!["a.CloseFailed"]);
        assert_eq!(
            abi.methods[0].exceptions.iter().map(|e| e.as_str()).collect::<Vec<_>>(),
            vec!["a.OpenFailed"]
        );
    }

    #[test]
    fn constants_require_static_final_non_private_literal() {
        let sf = AccessFlags::STATIC | AccessFlags::FINAL;
        let bytes = ClassSpec::new("a/A")
            .constant(sf | AccessFlags::PUBLIC, "X", "I", Literal::Int(12))
            .constant(sf, "PKG", "J", Literal::Long(7))
            .constant(sf | AccessFlags::PRIVATE, "HIDDEN", "I", Literal::Int(1))
            .constant(AccessFlags::STATIC | AccessFlags::PUBLIC, "MUTABLE", "I", Literal::Int(3))
            .constant(sf | AccessFlags::PUBLIC, "S", "Ljava/lang/String;", Literal::Str("hi".into()))
            .field(sf | AccessFlags::PUBLIC, "NO_VALUE", "La/B;")
            .to_bytes();

        let abi = extract(&bytes).unwrap();
        let constants: Vec<&str> = abi.constants.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(constants, vec!["X", "PKG", "S"]);
        assert_eq!(abi.constants_by_name()["X"], fingerprint("12"));
        assert_eq!(abi.constants_by_name()["S"], fingerprint("hi"));
        assert_ne!(fingerprint("12"), fingerprint("42"));
    }

    #[test]
    fn long_constants_occupy_two_pool_slots() {
        let bytes = ClassSpec::new("a/A")
            .constant(
                AccessFlags::PUBLIC | AccessFlags::STATIC | AccessFlags::FINAL,
                "BIG",
                "J",
                Literal::Long(1 << 40),
            )
            .field(AccessFlags::PUBLIC, "after", "La/After;")
            .to_bytes();

        let abi = extract(&bytes).unwrap();
        assert_eq!(abi.constants[0].fingerprint, fingerprint("1099511627776"));
        assert_eq!(names(&abi.exposed), vec!["a.After"]);
    }

    #[test]
    fn origin_reads_source_file_attribute() {
        let bytes = ClassSpec::new("p/Outer$Inner")
            .source_file("Outer.java")
            .to_bytes();
        let (name, source) = origin(&bytes).unwrap();
        assert_eq!(name.as_str(), "p.Outer$Inner");
        assert_eq!(source.as_deref(), Some("Outer.java"));
    }

    #[test]
    fn malformed_input_is_rejected() {
        assert!(matches!(
            extract(b"not a class"),
            Err(ClassFileError::BadMagic(_))
        ));

        let bytes = ClassSpec::new("a/A").to_bytes();
        assert!(matches!(
            extract(&bytes[..bytes.len() - 3]),
            Err(ClassFileError::UnexpectedEof { .. })
        ));

        let mut padded = bytes.clone();
        padded.push(0);
        assert!(matches!(
            extract(&padded),
            Err(ClassFileError::TrailingBytes(1))
        ));

        assert!(extract(&[]).is_err());
    }

    /// Class header with `count` as the constant pool count, followed by
    /// `filler` empty Utf8 entries and one long constant.
    fn pool_ending_in_long(count: u16, filler: u16) -> Vec<u8> {
        let mut bytes = vec![0xCA, 0xFE, 0xBA, 0xBE, 0, 0, 0, 61];
        bytes.extend_from_slice(&count.to_be_bytes());
        for _ in 0..filler {
            bytes.extend_from_slice(&[1, 0, 0]);
        }
        bytes.push(5);
        bytes.extend_from_slice(&7u64.to_be_bytes());
        bytes
    }

    #[test]
    fn long_in_last_pool_slot_is_rejected() {
        assert!(matches!(
            extract(&pool_ending_in_long(3, 1)),
            Err(ClassFileError::WideConstantAtEnd { index: 2 })
        ));
        assert!(matches!(
            extract(&pool_ending_in_long(u16::MAX, u16::MAX - 2)),
            Err(ClassFileError::WideConstantAtEnd { index: 0xFFFE })
        ));
    }

    #[test]
    fn modified_utf8_decodes_nul_and_surrogates() {
        assert_eq!(decode_modified_utf8(&[0x61, 0xC0, 0x80]).as_deref(), Some("a\0"));
        // U+1F600 as a CESU-8 surrogate pair.
        let emoji = [0xED, 0xA0, 0xBD, 0xED, 0xB8, 0x80];
        assert_eq!(decode_modified_utf8(&emoji).as_deref(), Some("\u{1F600}"));
        assert!(decode_modified_utf8(&[0xF8]).is_none());
    }
}
