//! In-process stub engine.
//!
//! Guest "modules" are Rust closures running over a simulated linear memory
//! with a bump allocator. They link against the same [`ImportNamespace`] a
//! real engine would see, so capabilities, the interop bridge and the pool
//! can be exercised without a WebAssembly toolchain.

use super::namespace::{HostCall, ImportNamespace};
use super::traits::{
    check_range, CompiledModule, Engine, GuestInstance, LinearMemory, NativeFunction, SharedMemory,
};
use super::value::Value;
use crate::error::{Result, SandboxError};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Size of one linear memory page.
pub const PAGE_SIZE: usize = 65_536;

/// Name the stub exports its memory under.
pub const MEMORY_EXPORT: &str = "memory";

/// The first bytes are never handed out so that 0 stays a null pointer.
const HEAP_BASE: usize = 16;

type StubExport = dyn Fn(&GuestEnv<'_>, &[Value]) -> Result<Vec<Value>> + Send + Sync;

/// Simulated linear memory.
pub struct StubMemory {
    state: Mutex<MemoryState>,
}

struct MemoryState {
    bytes: Vec<u8>,
    next: usize,
}

impl StubMemory {
    /// Creates a memory of `pages` pages.
    #[must_use]
    pub fn new(pages: usize) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                bytes: vec![0; pages * PAGE_SIZE],
                next: HEAP_BASE,
            }),
        }
    }

    /// Grows the memory by `pages` pages, returning the new size in bytes.
    pub fn grow(&self, pages: usize) -> usize {
        let mut state = self.state.lock();
        let new_len = state.bytes.len() + pages * PAGE_SIZE;
        state.bytes.resize(new_len, 0);
        new_len
    }

    /// Allocates `len` bytes, growing the memory when the heap runs out.
    ///
    /// # Errors
    ///
    /// Returns an out of bounds error if the allocation cannot be addressed
    /// with an `i32` pointer.
    pub fn alloc(&self, len: usize) -> Result<usize> {
        let mut state = self.state.lock();
        let ptr = state.next.next_multiple_of(8);
        let end = ptr
            .checked_add(len)
            .filter(|end| i32::try_from(*end).is_ok())
            .ok_or_else(|| {
                SandboxError::out_of_bounds(ptr as u64, len as u64, state.bytes.len() as u64)
            })?;
        if end > state.bytes.len() {
            let new_len = end.next_multiple_of(PAGE_SIZE);
            state.bytes.resize(new_len, 0);
        }
        state.next = end;
        Ok(ptr)
    }
}

impl LinearMemory for StubMemory {
    fn size(&self) -> usize {
        self.state.lock().bytes.len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        let state = self.state.lock();
        check_range(offset, buf.len(), state.bytes.len())?;
        buf.copy_from_slice(&state.bytes[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&self, offset: usize, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        check_range(offset, data.len(), state.bytes.len())?;
        state.bytes[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }
}

impl fmt::Debug for StubMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StubMemory")
            .field("size", &self.size())
            .finish_non_exhaustive()
    }
}

/// The guest's view of its own instance while a stub export runs.
pub struct GuestEnv<'a> {
    memory: &'a StubMemory,
    imports: &'a ImportNamespace,
}

impl<'a> GuestEnv<'a> {
    /// The instance's linear memory.
    #[must_use]
    pub fn memory(&self) -> &StubMemory {
        self.memory
    }

    /// Allocates `len` bytes of guest memory.
    ///
    /// # Errors
    ///
    /// Fails when the pointer would not fit an `i32`.
    pub fn alloc(&self, len: usize) -> Result<i32> {
        let ptr = self.memory.alloc(len)?;
        to_ptr(ptr)
    }

    /// Copies `data` into freshly allocated memory and returns its pointer.
    ///
    /// # Errors
    ///
    /// Fails when the allocation fails.
    pub fn write_bytes(&self, data: &[u8]) -> Result<i32> {
        let ptr = self.memory.alloc(data.len())?;
        self.memory.write(ptr, data)?;
        to_ptr(ptr)
    }

    /// Reads `len` bytes at `ptr`.
    ///
    /// # Errors
    ///
    /// Returns an out of bounds error for ranges past the end of memory.
    pub fn read_bytes(&self, ptr: i32, len: usize) -> Result<Vec<u8>> {
        let offset = usize::try_from(ptr)
            .map_err(|_| SandboxError::invalid_argument("ptr", "negative pointer"))?;
        let mut buf = vec![0; len];
        self.memory.read(offset, &mut buf)?;
        Ok(buf)
    }

    /// Lays out `s` the way AssemblyScript does: UTF-16LE code units preceded
    /// by their byte length as a little-endian `u32`. Returns the pointer to
    /// the first code unit.
    ///
    /// # Errors
    ///
    /// Fails when the allocation fails.
    pub fn write_assemblyscript_string(&self, s: &str) -> Result<i32> {
        let units: Vec<u8> = s.encode_utf16().flat_map(u16::to_le_bytes).collect();
        let len = u32::try_from(units.len())
            .map_err(|_| SandboxError::invalid_argument("string", "string too long"))?;
        let mut block = len.to_le_bytes().to_vec();
        block.extend_from_slice(&units);
        let base = self.write_bytes(&block)?;
        Ok(base + 4)
    }

    /// Writes `s` as a NUL-terminated UTF-8 string.
    ///
    /// # Errors
    ///
    /// Fails when the allocation fails.
    pub fn write_c_string(&self, s: &str) -> Result<i32> {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        self.write_bytes(&bytes)
    }

    /// Calls an imported host function.
    ///
    /// # Errors
    ///
    /// Returns an export not found error for unknown imports, otherwise
    /// whatever the host function returns.
    pub fn call(&self, group: &str, name: &str, args: &[Value]) -> Result<Vec<Value>> {
        let function = self
            .imports
            .get(group, name)
            .ok_or_else(|| SandboxError::export_not_found(format!("{group}.{name}")))?;
        let caller = HostCall::new(self.memory);
        function.call(&format!("{group}.{name}"), &caller, args)
    }

    /// Calls an imported host function that returns a single `i32`.
    ///
    /// # Errors
    ///
    /// Fails like [`call`](Self::call), or when the result is not one `i32`.
    pub fn call_i32(&self, group: &str, name: &str, args: &[Value]) -> Result<i32> {
        let results = self.call(group, name, args)?;
        match results.as_slice() {
            [Value::I32(v)] => Ok(*v),
            _ => Err(SandboxError::call_failed(
                format!("{group}.{name}"),
                "expected a single i32 result",
            )),
        }
    }

    /// Registers `bytes` with the host through `interop.registerBuffer` and
    /// returns the handle.
    ///
    /// # Errors
    ///
    /// Fails when the allocation or the host call fails.
    pub fn send_message(&self, bytes: &[u8]) -> Result<i32> {
        let ptr = self.write_bytes(bytes)?;
        let len = i32::try_from(bytes.len())
            .map_err(|_| SandboxError::invalid_argument("len", "message too large"))?;
        self.call_i32("interop", "registerBuffer", &[Value::I32(ptr), Value::I32(len)])
    }

    /// Copies the buffer behind `handle` into guest memory and returns it.
    ///
    /// # Errors
    ///
    /// Fails when the handle is unknown or the host calls fail.
    pub fn receive_message(&self, handle: i32) -> Result<Vec<u8>> {
        let size = self.call_i32("interop", "bufferSize", &[Value::I32(handle)])?;
        let len = usize::try_from(size)
            .map_err(|_| SandboxError::invalid_argument("handle", "negative buffer size"))?;
        let ptr = self.alloc(len)?;
        self.call("interop", "readBuffer", &[Value::I32(handle), Value::I32(ptr)])?;
        self.read_bytes(ptr, len)
    }
}

fn to_ptr(ptr: usize) -> Result<i32> {
    i32::try_from(ptr).map_err(|_| SandboxError::invalid_argument("ptr", "pointer overflow"))
}

/// A compiled stub module: a name, a memory size, the imports it requires
/// and its exported functions.
#[derive(Clone)]
pub struct StubModule {
    name: String,
    memory_pages: Option<usize>,
    imports: Vec<(String, String)>,
    exports: BTreeMap<String, Arc<StubExport>>,
}

impl StubModule {
    /// Creates a module with one page of memory and no exports.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            memory_pages: Some(1),
            imports: Vec::new(),
            exports: BTreeMap::new(),
        }
    }

    /// Sets the initial memory size.
    #[must_use]
    pub fn with_memory_pages(mut self, pages: usize) -> Self {
        self.memory_pages = Some(pages);
        self
    }

    /// Removes the memory export.
    #[must_use]
    pub fn without_memory(mut self) -> Self {
        self.memory_pages = None;
        self
    }

    /// Declares a required import. Instantiation fails if the namespace
    /// does not define it.
    #[must_use]
    pub fn with_import(mut self, group: impl Into<String>, name: impl Into<String>) -> Self {
        self.imports.push((group.into(), name.into()));
        self
    }

    /// Adds an exported function.
    #[must_use]
    pub fn with_export(
        mut self,
        name: impl Into<String>,
        export: impl Fn(&GuestEnv<'_>, &[Value]) -> Result<Vec<Value>> + Send + Sync + 'static,
    ) -> Self {
        self.exports.insert(name.into(), Arc::new(export));
        self
    }

    /// The module name, also the bytes [`StubEngine::compile`] expects.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for StubModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StubModule")
            .field("name", &self.name)
            .field("memory_pages", &self.memory_pages)
            .field("imports", &self.imports)
            .field("exports", &self.exports.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CompiledModule for StubModule {
    fn instantiate(&self, imports: &ImportNamespace) -> Result<Arc<dyn GuestInstance>> {
        if let Some((group, name)) = self
            .imports
            .iter()
            .find(|(group, name)| !imports.contains(group, name))
        {
            return Err(SandboxError::instantiation_failed(format!(
                "module '{}' imports '{group}.{name}' which is not defined",
                self.name
            )));
        }

        let memory = self
            .memory_pages
            .map(|pages| Arc::new(StubMemory::new(pages)));

        tracing::trace!(module = %self.name, "Stub instance created");

        Ok(Arc::new(StubInstance {
            module: self.name.clone(),
            memory,
            imports: Arc::new(imports.clone()),
            exports: self.exports.clone(),
        }))
    }
}

/// A live stub instance.
pub struct StubInstance {
    module: String,
    memory: Option<Arc<StubMemory>>,
    imports: Arc<ImportNamespace>,
    exports: BTreeMap<String, Arc<StubExport>>,
}

impl fmt::Debug for StubInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StubInstance")
            .field("module", &self.module)
            .field("memory", &self.memory)
            .finish_non_exhaustive()
    }
}

impl GuestInstance for StubInstance {
    fn memory(&self, name: &str) -> Result<SharedMemory> {
        match &self.memory {
            Some(memory) if name == MEMORY_EXPORT => Ok(memory.clone()),
            _ => Err(SandboxError::memory_not_found(name)),
        }
    }

    fn function(&self, name: &str) -> Result<NativeFunction> {
        let export = self
            .exports
            .get(name)
            .cloned()
            .ok_or_else(|| SandboxError::export_not_found(name))?;
        let memory = self
            .memory
            .clone()
            .unwrap_or_else(|| Arc::new(StubMemory::new(0)));
        let imports = self.imports.clone();

        Ok(NativeFunction::new(name, move |args| {
            let env = GuestEnv {
                memory: &memory,
                imports: &imports,
            };
            export(&env, args)
        }))
    }
}

/// Engine that "compiles" a module by looking its name up in a registry.
#[derive(Debug, Default)]
pub struct StubEngine {
    modules: Mutex<HashMap<String, Arc<StubModule>>>,
}

impl StubEngine {
    /// Creates an engine with no registered modules.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a module and returns the bytes that compile to it.
    pub fn register(&self, module: StubModule) -> Vec<u8> {
        let bytes = module.name.as_bytes().to_vec();
        self.modules.lock().insert(module.name.clone(), Arc::new(module));
        bytes
    }
}

impl Engine for StubEngine {
    fn compile(&self, bytes: &[u8]) -> Result<Arc<dyn CompiledModule>> {
        let name = std::str::from_utf8(bytes)
            .map_err(|e| SandboxError::compilation_failed("module bytes are not a stub module name").with_source(e))?;
        let module = self
            .modules
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| SandboxError::compilation_failed(format!("unknown stub module '{name}'")))?;
        Ok(module as Arc<dyn CompiledModule>)
    }
}
