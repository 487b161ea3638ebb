//! Compiled-C adapter (the compile-and-load pattern).
//!
//! Source is written to a temp file, compiled into a shared library
//! with the system compiler, and loaded with `libloading`. Calls go
//! through a libffi trampoline driven by a typed-signature table
//! scanned from the source's function definitions. Struct parameters
//! and returns go by value through a struct-layout table scanned from
//! the source's `struct` declarations (flat, scalar-field structs;
//! fields are matched to the host struct by name). The content-hash
//! cache skips recompilation of previously seen source. The load
//! handle owns the library; replacing or closing it unloads.

use crate::adapters::run_command;
use crate::cache::ArtifactCache;
use crate::wrapper::COMPILE_TIMEOUT;
use libffi::middle::{Arg, Cif, CodePtr, Type};
use naab_core::{
    CancelFlag, ErrorKind, Executor, NaabError, StackFrame, StructDef, StructField,
    StructInstance, Value,
};
use naab_parser::ast::TypeExpr;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use rustc_hash::FxHashMap;
use std::ffi::{c_char, c_void, CStr, CString};
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

/// Largest struct the trampoline will accept as a return value.
const MAX_STRUCT_RETURN_BYTES: usize = 64;

/// Supported C-side types in the signature table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CType {
    Void,
    Int32,
    Int64,
    Double,
    Bool,
    CharPtr,
    /// A named struct passed or returned by value; resolved against
    /// the scanned layout table
    Struct(String),
}

impl CType {
    /// libffi type for scalars. Struct types resolve through the
    /// layout table in [`resolve_type`].
    fn libffi_scalar(&self) -> Type {
        match self {
            CType::Void => Type::void(),
            CType::Int32 => Type::i32(),
            CType::Int64 => Type::i64(),
            CType::Double => Type::f64(),
            CType::Bool => Type::u8(),
            CType::CharPtr => Type::pointer(),
            // The layout scanner only admits scalar fields
            CType::Struct(_) => unreachable!("nested struct layouts are rejected"),
        }
    }

    fn parse(text: &str) -> Option<CType> {
        let text = text.trim();
        if let Some(rest) = text.strip_prefix("struct ") {
            let rest = rest.trim();
            // By value only; pointer-to-struct is not in the table
            if rest.is_empty() || rest.contains('*') {
                return None;
            }
            return Some(CType::Struct(rest.to_string()));
        }
        match text {
            "void" => Some(CType::Void),
            "int" | "int32_t" => Some(CType::Int32),
            "long" | "long long" | "int64_t" => Some(CType::Int64),
            "double" | "float" => Some(CType::Double),
            "bool" | "_Bool" => Some(CType::Bool),
            _ if text.ends_with('*') && text.contains("char") => Some(CType::CharPtr),
            _ => None,
        }
    }
}

/// Declared signature of one exported function.
#[derive(Debug, Clone)]
pub struct Signature {
    pub args: Vec<CType>,
    pub ret: CType,
}

/// Field layout of one C struct, in declaration order. Only scalar
/// field types are admitted, so offsets follow the platform ABI from
/// size/alignment alone.
#[derive(Debug, Clone)]
pub struct StructLayout {
    pub fields: Vec<(String, CType)>,
}

struct LoadedLibrary {
    library: libloading::Library,
    signatures: FxHashMap<String, Signature>,
    layouts: FxHashMap<String, StructLayout>,
}

static CACHE: Lazy<ArtifactCache> = Lazy::new(|| {
    ArtifactCache::new(ArtifactCache::default_root()).unwrap_or_else(|e| {
        log::warn!("user-scope artifact cache unavailable ({}), using temp dir", e);
        ArtifactCache::new(std::env::temp_dir().join("naab-cache"))
            .expect("temp-dir artifact cache")
    })
});

static SIGNATURE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^\s*(void|struct\s+\w+|int|long long|long|int32_t|int64_t|double|float|bool|_Bool|(?:const\s+)?char\s*\*)\s+(\w+)\s*\(([^)]*)\)\s*\{",
    )
    .expect("signature regex")
});

static STRUCT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"struct\s+(\w+)\s*\{([^}]*)\}\s*;").expect("struct regex")
});

pub struct CExecutor {
    state: Mutex<Option<LoadedLibrary>>,
    /// C declarations generated from bound host values, prepended to
    /// the next compiled unit
    bindings: Mutex<Vec<String>>,
    output: Mutex<String>,
    cancel: CancelFlag,
}

impl CExecutor {
    pub fn new() -> Result<Self, NaabError> {
        Ok(Self {
            state: Mutex::new(None),
            bindings: Mutex::new(Vec::new()),
            output: Mutex::new(String::new()),
            cancel: CancelFlag::new(),
        })
    }

    fn compiler() -> String {
        std::env::var("C_PATH").unwrap_or_else(|_| "cc".to_string())
    }

    /// Compile `code` into a shared library, reusing the artifact
    /// cache on content-hash hits.
    fn compile(&self, code: &str) -> Result<PathBuf, NaabError> {
        if let Some(hit) = CACHE.lookup("c", code) {
            log::debug!("artifact cache hit for inline c code");
            return Ok(hit);
        }

        let dir = tempfile::tempdir()?;
        let src_path = dir.path().join("inline.c");
        let out_path = dir.path().join("inline.so");
        let mut src = std::fs::File::create(&src_path)?;
        src.write_all(code.as_bytes())?;
        src.flush()?;

        let mut command = Command::new(Self::compiler());
        command.args([
            "-shared",
            "-fPIC",
            "-O2",
            "-o",
            out_path.to_str().ok_or_else(bad_path)?,
            src_path.to_str().ok_or_else(bad_path)?,
            "-lm",
        ]);
        let result = run_command(command, COMPILE_TIMEOUT, &self.cancel)?;
        if result.status_code != 0 {
            return Err(NaabError::foreign(
                "c",
                format!("compilation failed:\n{}", result.stderr.trim()),
                vec![StackFrame::new("c", "<compile>", "<inline>", 0)],
            ));
        }

        let cached = CACHE.store("c", code, &out_path)?;
        CACHE.maintain(crate::cache::DEFAULT_CACHE_CAP_BYTES)?;
        Ok(cached)
    }

    fn load(&self, code: &str) -> Result<(), NaabError> {
        let full = self.with_prelude(code);
        let binary = self.compile(&full)?;
        let library = unsafe { libloading::Library::new(&binary) }.map_err(|e| {
            NaabError::foreign(
                "c",
                format!("failed to load {}: {}", binary.display(), e),
                Vec::new(),
            )
        })?;
        let signatures = scan_signatures(&full);
        let layouts = scan_struct_layouts(&full);
        // Replacing the previous library drops (and unloads) it
        *self.state.lock() = Some(LoadedLibrary {
            library,
            signatures,
            layouts,
        });
        Ok(())
    }

    fn with_prelude(&self, code: &str) -> String {
        let bindings = self.bindings.lock().join("\n");
        format!(
            "#include <stdint.h>\n#include <stdio.h>\n#include <string.h>\n{}\n{}",
            bindings, code
        )
    }

    fn call_loaded(&self, name: &str, args: &[Value]) -> Result<Value, NaabError> {
        let state = self.state.lock();
        let loaded = state.as_ref().ok_or_else(|| {
            NaabError::new(
                ErrorKind::Foreign,
                "no compiled library is loaded".to_string(),
            )
        })?;
        let signature = loaded.signatures.get(name).ok_or_else(|| {
            NaabError::new(
                ErrorKind::Foreign,
                format!("no signature known for c function '{}'", name),
            )
        })?;
        if signature.args.len() != args.len() {
            return Err(NaabError::new(
                ErrorKind::Arity,
                format!(
                    "c function '{}' takes {} arguments, got {}",
                    name,
                    signature.args.len(),
                    args.len()
                ),
            ));
        }

        let symbol: libloading::Symbol<'_, unsafe extern "C" fn()> = unsafe {
            loaded.library.get(name.as_bytes()).map_err(|e| {
                NaabError::new(
                    ErrorKind::Foreign,
                    format!("symbol '{}' not found: {}", name, e),
                )
            })?
        };
        let code_ptr = CodePtr(*symbol as *mut c_void);

        // Holders keep every marshalled argument alive across the call
        let mut i32_args: Vec<i32> = Vec::new();
        let mut i64_args: Vec<i64> = Vec::new();
        let mut f64_args: Vec<f64> = Vec::new();
        let mut u8_args: Vec<u8> = Vec::new();
        let mut strings: Vec<CString> = Vec::new();
        let mut ptrs: Vec<*const c_char> = Vec::new();
        let mut struct_bufs: Vec<Box<[u64]>> = Vec::new();

        enum Slot {
            I32(usize),
            I64(usize),
            F64(usize),
            U8(usize),
            Ptr(usize),
            Struct(usize),
        }
        let mut slots = Vec::with_capacity(args.len());

        for (value, ty) in args.iter().zip(signature.args.iter()) {
            match (ty, value) {
                (CType::Int32, Value::Int(i)) => {
                    let v = i32::try_from(*i).map_err(|_| {
                        NaabError::new(
                            ErrorKind::MarshalOverflow,
                            format!("{} does not fit in a c int", i),
                        )
                    })?;
                    i32_args.push(v);
                    slots.push(Slot::I32(i32_args.len() - 1));
                }
                (CType::Int64, Value::Int(i)) => {
                    i64_args.push(*i);
                    slots.push(Slot::I64(i64_args.len() - 1));
                }
                (CType::Double, Value::Int(i)) => {
                    f64_args.push(*i as f64);
                    slots.push(Slot::F64(f64_args.len() - 1));
                }
                (CType::Double, Value::Float(f)) => {
                    f64_args.push(*f);
                    slots.push(Slot::F64(f64_args.len() - 1));
                }
                (CType::Bool, Value::Bool(b)) => {
                    u8_args.push(u8::from(*b));
                    slots.push(Slot::U8(u8_args.len() - 1));
                }
                (CType::CharPtr, Value::Str(s)) => {
                    let c = CString::new(s.as_ref().as_bytes()).map_err(|_| {
                        NaabError::new(
                            ErrorKind::Marshal,
                            "string contains NUL".to_string(),
                        )
                    })?;
                    strings.push(c);
                    ptrs.push(strings.last().expect("just pushed").as_ptr());
                    slots.push(Slot::Ptr(ptrs.len() - 1));
                }
                (CType::Struct(struct_name), Value::Struct(instance)) => {
                    let layout = loaded.layouts.get(struct_name).ok_or_else(|| {
                        NaabError::new(
                            ErrorKind::Marshal,
                            format!("no layout known for c struct '{}'", struct_name),
                        )
                    })?;
                    let buf =
                        build_struct_arg(struct_name, layout, instance, &mut strings)?;
                    struct_bufs.push(buf);
                    slots.push(Slot::Struct(struct_bufs.len() - 1));
                }
                (ty, value) => {
                    return Err(NaabError::new(
                        ErrorKind::Marshal,
                        format!(
                            "cannot pass {} as c {:?}",
                            value.type_name(),
                            ty
                        ),
                    ))
                }
            }
        }

        let ffi_args: Vec<Arg> = slots
            .iter()
            .map(|slot| match slot {
                Slot::I32(i) => Arg::new(&i32_args[*i]),
                Slot::I64(i) => Arg::new(&i64_args[*i]),
                Slot::F64(i) => Arg::new(&f64_args[*i]),
                Slot::U8(i) => Arg::new(&u8_args[*i]),
                Slot::Ptr(i) => Arg::new(&ptrs[*i]),
                Slot::Struct(i) => Arg::new(&struct_bufs[*i][0]),
            })
            .collect();

        let arg_types = signature
            .args
            .iter()
            .map(|t| resolve_type(t, &loaded.layouts))
            .collect::<Result<Vec<_>, _>>()?;
        let ret_type = resolve_type(&signature.ret, &loaded.layouts)?;
        let cif = Cif::new(arg_types, ret_type);

        let result = unsafe {
            match &signature.ret {
                CType::Void => {
                    cif.call::<()>(code_ptr, &ffi_args);
                    Value::Null
                }
                CType::Int32 => Value::Int(cif.call::<i32>(code_ptr, &ffi_args) as i64),
                CType::Int64 => Value::Int(cif.call::<i64>(code_ptr, &ffi_args)),
                CType::Double => Value::Float(cif.call::<f64>(code_ptr, &ffi_args)),
                CType::Bool => Value::Bool(cif.call::<u8>(code_ptr, &ffi_args) != 0),
                CType::CharPtr => {
                    let ptr = cif.call::<*const c_char>(code_ptr, &ffi_args);
                    if ptr.is_null() {
                        Value::Null
                    } else {
                        // Immutable copy of the foreign string
                        Value::string(CStr::from_ptr(ptr).to_string_lossy().into_owned())
                    }
                }
                CType::Struct(struct_name) => {
                    let layout = loaded.layouts.get(struct_name).ok_or_else(|| {
                        NaabError::new(
                            ErrorKind::Marshal,
                            format!("no layout known for c struct '{}'", struct_name),
                        )
                    })?;
                    let (offsets, total, _) = layout_offsets(layout);
                    if total > MAX_STRUCT_RETURN_BYTES {
                        return Err(NaabError::new(
                            ErrorKind::Marshal,
                            format!(
                                "c struct '{}' of {} bytes exceeds the {} byte return cap",
                                struct_name, total, MAX_STRUCT_RETURN_BYTES
                            ),
                        ));
                    }
                    // Oversized, 8-aligned receive buffer; libffi
                    // writes sizeof(struct) bytes into it
                    let raw: [u64; MAX_STRUCT_RETURN_BYTES / 8] =
                        cif.call(code_ptr, &ffi_args);
                    decode_struct_return(struct_name, layout, &offsets, &raw)?
                }
            }
        };
        Ok(result)
    }
}

fn bad_path() -> NaabError {
    NaabError::new(ErrorKind::Io, "non-UTF-8 temp path".to_string())
}

/// libffi type for a signature entry, resolving struct names through
/// the layout table.
fn resolve_type(
    ty: &CType,
    layouts: &FxHashMap<String, StructLayout>,
) -> Result<Type, NaabError> {
    match ty {
        CType::Struct(name) => {
            let layout = layouts.get(name).ok_or_else(|| {
                NaabError::new(
                    ErrorKind::Marshal,
                    format!("no layout known for c struct '{}'", name),
                )
            })?;
            Ok(Type::structure(
                layout.fields.iter().map(|(_, t)| t.libffi_scalar()),
            ))
        }
        other => Ok(other.libffi_scalar()),
    }
}

/// Size and alignment of a scalar field.
fn scalar_size_align(ty: &CType) -> (usize, usize) {
    match ty {
        CType::Int32 => (4, 4),
        CType::Int64 | CType::Double => (8, 8),
        CType::Bool => (1, 1),
        CType::CharPtr => (
            std::mem::size_of::<*const c_char>(),
            std::mem::align_of::<*const c_char>(),
        ),
        CType::Void | CType::Struct(_) => unreachable!("not a struct field type"),
    }
}

/// Field offsets, padded total size, and alignment of a layout.
fn layout_offsets(layout: &StructLayout) -> (Vec<usize>, usize, usize) {
    let mut offset = 0usize;
    let mut max_align = 1usize;
    let mut offsets = Vec::with_capacity(layout.fields.len());
    for (_, ty) in &layout.fields {
        let (size, align) = scalar_size_align(ty);
        offset = (offset + align - 1) / align * align;
        offsets.push(offset);
        offset += size;
        max_align = max_align.max(align);
    }
    let total = ((offset + max_align - 1) / max_align * max_align).max(1);
    (offsets, total, max_align)
}

/// Marshal a host struct into raw C-struct memory per the scanned
/// layout. Fields match by name; a host struct must carry every field
/// the C struct declares, and nothing the C struct does not.
fn build_struct_arg(
    struct_name: &str,
    layout: &StructLayout,
    instance: &StructInstance,
    strings: &mut Vec<CString>,
) -> Result<Box<[u64]>, NaabError> {
    for field in instance.def.field_names() {
        if !layout.fields.iter().any(|(n, _)| n == field) {
            return Err(NaabError::new(
                ErrorKind::StructField,
                format!("c struct '{}' has no field '{}'", struct_name, field),
            ));
        }
    }

    let (offsets, total, _) = layout_offsets(layout);
    let mut bytes = vec![0u8; total];
    for ((field_name, ty), offset) in layout.fields.iter().zip(offsets) {
        let value = instance.get_field(field_name).ok_or_else(|| {
            NaabError::new(
                ErrorKind::StructField,
                format!(
                    "missing required field '{}' for c struct '{}'",
                    field_name, struct_name
                ),
            )
        })?;
        match (ty, &value) {
            (CType::Int32, Value::Int(i)) => {
                let v = i32::try_from(*i).map_err(|_| {
                    NaabError::new(
                        ErrorKind::MarshalOverflow,
                        format!("{} does not fit in a c int", i),
                    )
                })?;
                bytes[offset..offset + 4].copy_from_slice(&v.to_ne_bytes());
            }
            (CType::Int64, Value::Int(i)) => {
                bytes[offset..offset + 8].copy_from_slice(&i.to_ne_bytes());
            }
            (CType::Double, Value::Int(i)) => {
                bytes[offset..offset + 8].copy_from_slice(&(*i as f64).to_ne_bytes());
            }
            (CType::Double, Value::Float(f)) => {
                bytes[offset..offset + 8].copy_from_slice(&f.to_ne_bytes());
            }
            (CType::Bool, Value::Bool(b)) => {
                bytes[offset] = u8::from(*b);
            }
            (CType::CharPtr, Value::Str(s)) => {
                let c = CString::new(s.as_ref().as_bytes()).map_err(|_| {
                    NaabError::new(ErrorKind::Marshal, "string contains NUL".to_string())
                })?;
                strings.push(c);
                let ptr = strings.last().expect("just pushed").as_ptr() as usize;
                let width = std::mem::size_of::<usize>();
                bytes[offset..offset + width].copy_from_slice(&ptr.to_ne_bytes());
            }
            (ty, value) => {
                return Err(NaabError::new(
                    ErrorKind::Marshal,
                    format!(
                        "field '{}' of c struct '{}': cannot pass {} as {:?}",
                        field_name,
                        struct_name,
                        value.type_name(),
                        ty
                    ),
                ))
            }
        }
    }

    // 8-aligned stable storage for the argument memory
    let words = (bytes.len() + 7) / 8;
    let mut buf = vec![0u64; words.max(1)].into_boxed_slice();
    unsafe {
        std::ptr::copy_nonoverlapping(
            bytes.as_ptr(),
            buf.as_mut_ptr() as *mut u8,
            bytes.len(),
        );
    }
    Ok(buf)
}

/// Decode raw C-struct return memory into a host struct value with a
/// definition synthesized from the scanned layout.
///
/// # Safety
/// `raw` must hold a value the callee wrote for this exact layout; a
/// CharPtr field is read as a pointer and copied.
unsafe fn decode_struct_return(
    struct_name: &str,
    layout: &StructLayout,
    offsets: &[usize],
    raw: &[u64; MAX_STRUCT_RETURN_BYTES / 8],
) -> Result<Value, NaabError> {
    let bytes =
        std::slice::from_raw_parts(raw.as_ptr() as *const u8, MAX_STRUCT_RETURN_BYTES);

    let mut values = Vec::with_capacity(layout.fields.len());
    let mut fields = Vec::with_capacity(layout.fields.len());
    for ((field_name, ty), &offset) in layout.fields.iter().zip(offsets) {
        let (value, type_name) = match ty {
            CType::Int32 => {
                let mut b = [0u8; 4];
                b.copy_from_slice(&bytes[offset..offset + 4]);
                (Value::Int(i32::from_ne_bytes(b) as i64), "int")
            }
            CType::Int64 => {
                let mut b = [0u8; 8];
                b.copy_from_slice(&bytes[offset..offset + 8]);
                (Value::Int(i64::from_ne_bytes(b)), "int")
            }
            CType::Double => {
                let mut b = [0u8; 8];
                b.copy_from_slice(&bytes[offset..offset + 8]);
                (Value::Float(f64::from_ne_bytes(b)), "float")
            }
            CType::Bool => (Value::Bool(bytes[offset] != 0), "bool"),
            CType::CharPtr => {
                let width = std::mem::size_of::<usize>();
                let mut b = [0u8; std::mem::size_of::<usize>()];
                b.copy_from_slice(&bytes[offset..offset + width]);
                let ptr = usize::from_ne_bytes(b) as *const c_char;
                let value = if ptr.is_null() {
                    Value::Null
                } else {
                    Value::string(CStr::from_ptr(ptr).to_string_lossy().into_owned())
                };
                (value, "string")
            }
            CType::Void | CType::Struct(_) => unreachable!("not a struct field type"),
        };
        values.push(value);
        fields.push(StructField {
            name: field_name.clone(),
            ty: TypeExpr::Named(type_name.to_string()),
            default: None,
        });
    }

    let def = Arc::new(StructDef::new(struct_name.to_string(), fields));
    Ok(Value::Struct(Arc::new(StructInstance::new(def, values))))
}

/// Scan C source for function definitions and build the signature
/// table used by the call trampoline.
fn scan_signatures(code: &str) -> FxHashMap<String, Signature> {
    let mut table = FxHashMap::default();
    for caps in SIGNATURE_RE.captures_iter(code) {
        let ret = match CType::parse(&caps[1]) {
            Some(t) => t,
            None => continue,
        };
        let name = caps[2].to_string();
        let params = caps[3].trim();
        let args = if params.is_empty() || params == "void" {
            Vec::new()
        } else {
            let mut parsed = Vec::new();
            let mut ok = true;
            for param in params.split(',') {
                // Strip the parameter name: the type is everything up
                // to the last word (or '*')
                let param = param.trim();
                let type_text = param
                    .rfind(|c: char| c == '*' || c == ' ')
                    .map(|i| &param[..=i])
                    .unwrap_or(param);
                match CType::parse(type_text) {
                    Some(t) => parsed.push(t),
                    None => {
                        ok = false;
                        break;
                    }
                }
            }
            if !ok {
                continue;
            }
            parsed
        };
        table.insert(name, Signature { args, ret });
    }
    table
}

/// Scan C source for flat struct declarations (`struct Name { ... };`)
/// and record their field layouts. Declarations with non-scalar fields
/// (nested structs, arrays, struct pointers) are skipped; functions
/// over such structs then fail signature resolution instead of being
/// called with a wrong layout.
fn scan_struct_layouts(code: &str) -> FxHashMap<String, StructLayout> {
    let mut table = FxHashMap::default();
    for caps in STRUCT_RE.captures_iter(code) {
        let name = caps[1].to_string();
        let mut fields = Vec::new();
        let mut ok = true;
        for decl in caps[2].split(';') {
            let decl = decl.trim();
            if decl.is_empty() {
                continue;
            }
            let split = match decl.rfind(|c: char| c == '*' || c.is_whitespace()) {
                Some(i) => i,
                None => {
                    ok = false;
                    break;
                }
            };
            let (type_text, field_name) = decl.split_at(split + 1);
            let field_name = field_name.trim();
            match CType::parse(type_text) {
                Some(ty)
                    if !matches!(ty, CType::Void | CType::Struct(_))
                        && !field_name.is_empty()
                        && !field_name.contains('[') =>
                {
                    fields.push((field_name.to_string(), ty));
                }
                _ => {
                    ok = false;
                    break;
                }
            }
        }
        if ok && !fields.is_empty() {
            table.insert(name, StructLayout { fields });
        }
    }
    table
}

impl Executor for CExecutor {
    fn language_id(&self) -> &str {
        "c"
    }

    fn initialized(&self) -> bool {
        self.state.lock().is_some()
    }

    fn execute(&self, code: &str) -> Result<(), NaabError> {
        self.cancel.clear();
        self.load(code)
    }

    fn execute_with_return(&self, code: &str) -> Result<Value, NaabError> {
        self.cancel.clear();
        let unit = if code.contains("__naab_main") {
            code.to_string()
        } else {
            format!("int64_t __naab_main(void) {{\n{}\n}}\n", code)
        };
        self.load(&unit)?;
        // The wrapper's signature is known even when the scan missed it
        self.state
            .lock()
            .as_mut()
            .expect("library just loaded")
            .signatures
            .entry("__naab_main".to_string())
            .or_insert(Signature {
                args: Vec::new(),
                ret: CType::Int64,
            });
        self.call_loaded("__naab_main", &[])
    }

    fn call_function(&self, name: &str, args: &[Value]) -> Result<Value, NaabError> {
        self.cancel.clear();
        self.call_loaded(name, args)
    }

    fn bind_value(&self, name: &str, value: &Value) -> Result<(), NaabError> {
        let decl = match value {
            Value::Int(i) => format!("static const int64_t {} = {}LL;", name, i),
            Value::Float(f) => format!("static const double {} = {:?};", name, f),
            Value::Bool(b) => format!("static const int {} = {};", name, u8::from(*b)),
            Value::Str(s) => format!(
                "static const char* {} = \"{}\";",
                name,
                s.replace('\\', "\\\\").replace('"', "\\\"")
            ),
            other => {
                return Err(NaabError::new(
                    ErrorKind::Marshal,
                    format!("cannot bind {} into c", other.type_name()),
                ))
            }
        };
        self.bindings.lock().push(decl);
        Ok(())
    }

    fn drain_captured_output(&self) -> String {
        // Native printf writes to the process's real stdout; there is
        // nothing buffered to drain
        std::mem::take(&mut *self.output.lock())
    }

    fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    fn close(&self) {
        // Dropping the library unloads it
        *self.state.lock() = None;
        self.bindings.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point_layout() -> StructLayout {
        StructLayout {
            fields: vec![
                ("x".to_string(), CType::Int64),
                ("y".to_string(), CType::Int64),
            ],
        }
    }

    fn point_instance(x: i64, y: i64) -> StructInstance {
        let def = Arc::new(StructDef::new(
            "Point".into(),
            vec![
                StructField {
                    name: "x".into(),
                    ty: TypeExpr::Named("int".into()),
                    default: None,
                },
                StructField {
                    name: "y".into(),
                    ty: TypeExpr::Named("int".into()),
                    default: None,
                },
            ],
        ));
        StructInstance::new(def, vec![Value::Int(x), Value::Int(y)])
    }

    #[test]
    fn test_ctype_parse() {
        assert_eq!(CType::parse("int"), Some(CType::Int32));
        assert_eq!(CType::parse("long long"), Some(CType::Int64));
        assert_eq!(CType::parse("const char *"), Some(CType::CharPtr));
        assert_eq!(
            CType::parse("struct Point"),
            Some(CType::Struct("Point".into()))
        );
        // Pointer-to-struct stays out of the table
        assert_eq!(CType::parse("struct Point *"), None);
        assert_eq!(CType::parse("union foo"), None);
    }

    #[test]
    fn test_scan_signatures() {
        let code = r#"
int64_t add(int64_t a, int64_t b) {
    return a + b;
}

double scale(double x) { return x * 2.0; }

struct Pair make(int64_t a, int64_t b) {
    struct Pair p = {a, b};
    return p;
}

static void helper(int unused) {
}
"#;
        let table = scan_signatures(code);
        let add = &table["add"];
        assert_eq!(add.ret, CType::Int64);
        assert_eq!(add.args, vec![CType::Int64, CType::Int64]);
        assert_eq!(table["scale"].ret, CType::Double);
        assert_eq!(table["make"].ret, CType::Struct("Pair".into()));
        // `static void` does not match the definition scanner
        assert!(!table.contains_key("helper"));
    }

    #[test]
    fn test_scan_struct_layouts() {
        let code = r#"
struct Pair {
    int64_t a;
    double b;
};

struct Holder {
    struct Pair inner;
};
"#;
        let table = scan_struct_layouts(code);
        let pair = &table["Pair"];
        assert_eq!(
            pair.fields,
            vec![
                ("a".to_string(), CType::Int64),
                ("b".to_string(), CType::Double)
            ]
        );
        // Nested struct fields are not admitted
        assert!(!table.contains_key("Holder"));
    }

    #[test]
    fn test_layout_offsets_insert_padding() {
        let layout = StructLayout {
            fields: vec![
                ("flag".to_string(), CType::Bool),
                ("n".to_string(), CType::Int64),
                ("small".to_string(), CType::Int32),
            ],
        };
        let (offsets, total, align) = layout_offsets(&layout);
        assert_eq!(offsets, vec![0, 8, 16]);
        assert_eq!(total, 24);
        assert_eq!(align, 8);
    }

    #[test]
    fn test_build_struct_arg_writes_fields() {
        let instance = point_instance(7, -1);
        let mut strings = Vec::new();
        let buf = build_struct_arg("Point", &point_layout(), &instance, &mut strings).unwrap();
        assert_eq!(buf.len(), 2);
        assert_eq!(buf[0], 7u64);
        assert_eq!(buf[1], (-1i64) as u64);
    }

    #[test]
    fn test_build_struct_arg_missing_field() {
        let def = Arc::new(StructDef::new(
            "Point".into(),
            vec![StructField {
                name: "x".into(),
                ty: TypeExpr::Named("int".into()),
                default: None,
            }],
        ));
        let instance = StructInstance::new(def, vec![Value::Int(1)]);
        let mut strings = Vec::new();
        let err = build_struct_arg("Point", &point_layout(), &instance, &mut strings)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::StructField);
    }

    #[test]
    fn test_build_struct_arg_unknown_field() {
        let def = Arc::new(StructDef::new(
            "Point3".into(),
            vec![
                StructField {
                    name: "x".into(),
                    ty: TypeExpr::Named("int".into()),
                    default: None,
                },
                StructField {
                    name: "z".into(),
                    ty: TypeExpr::Named("int".into()),
                    default: None,
                },
            ],
        ));
        let instance = StructInstance::new(def, vec![Value::Int(1), Value::Int(2)]);
        let mut strings = Vec::new();
        let err = build_struct_arg("Point", &point_layout(), &instance, &mut strings)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::StructField);
        assert!(err.message.contains("no field 'z'"));
    }

    // The remaining tests shell out to the system C compiler.

    #[test]
    #[ignore = "requires a system C compiler"]
    fn test_inline_expression() {
        let exec = CExecutor::new().unwrap();
        let value = exec.execute_with_return("return 40 + 2;").unwrap();
        assert!(value.equal(&Value::Int(42)));
    }

    #[test]
    #[ignore = "requires a system C compiler"]
    fn test_define_and_call() {
        let exec = CExecutor::new().unwrap();
        exec.execute("int64_t add(int64_t a, int64_t b) { return a + b; }")
            .unwrap();
        let value = exec
            .call_function("add", &[Value::Int(40), Value::Int(2)])
            .unwrap();
        assert!(value.equal(&Value::Int(42)));
    }

    #[test]
    #[ignore = "requires a system C compiler"]
    fn test_string_round_trip() {
        let exec = CExecutor::new().unwrap();
        exec.execute(
            "const char* greet(const char* name) { static char buf[64]; snprintf(buf, 64, \"hi %s\", name); return buf; }",
        )
        .unwrap();
        let value = exec
            .call_function("greet", &[Value::string("naab")])
            .unwrap();
        assert_eq!(value.as_str(), Some("hi naab"));
    }

    #[test]
    #[ignore = "requires a system C compiler"]
    fn test_struct_argument() {
        let exec = CExecutor::new().unwrap();
        exec.execute(
            "struct Point { int64_t x; int64_t y; };\n\
             int64_t manhattan(struct Point p) { return p.x + p.y; }",
        )
        .unwrap();
        let value = exec
            .call_function(
                "manhattan",
                &[Value::Struct(Arc::new(point_instance(40, 2)))],
            )
            .unwrap();
        assert!(value.equal(&Value::Int(42)));
    }

    #[test]
    #[ignore = "requires a system C compiler"]
    fn test_struct_return_round_trip() {
        let exec = CExecutor::new().unwrap();
        exec.execute(
            "struct Point { int64_t x; int64_t y; };\n\
             struct Point swap(struct Point p) {\n\
                 struct Point out = { p.y, p.x };\n\
                 return out;\n\
             }",
        )
        .unwrap();
        let value = exec
            .call_function("swap", &[Value::Struct(Arc::new(point_instance(1, 2)))])
            .unwrap();
        let Value::Struct(result) = value else {
            panic!("expected a struct return");
        };
        assert_eq!(result.def.name, "Point");
        assert!(result.get_field("x").unwrap().equal(&Value::Int(2)));
        assert!(result.get_field("y").unwrap().equal(&Value::Int(1)));
    }

    #[test]
    #[ignore = "requires a system C compiler"]
    fn test_list_argument_is_marshal_error() {
        let exec = CExecutor::new().unwrap();
        exec.execute("int64_t id(int64_t x) { return x; }").unwrap();
        let err = exec
            .call_function("id", &[Value::list(vec![])])
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Marshal);
    }

    #[test]
    #[ignore = "requires a system C compiler"]
    fn test_bindings_compile_in() {
        let exec = CExecutor::new().unwrap();
        exec.bind_value("base", &Value::Int(40)).unwrap();
        let value = exec.execute_with_return("return base + 2;").unwrap();
        assert!(value.equal(&Value::Int(42)));
    }

    #[test]
    #[ignore = "requires a system C compiler"]
    fn test_compile_error_preserves_compiler_text() {
        let exec = CExecutor::new().unwrap();
        let err = exec.execute("int broken( {").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Foreign);
        assert!(err.message.contains("compilation failed"));
    }
}
