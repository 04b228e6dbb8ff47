//! WebAssembly engine backed by wasmtime.
//!
//! Every instance owns its own `Store` and `Linker`: pool members never share
//! mutable engine state, only the compiled `Module`. Host functions are
//! linked dynamically from the [`ImportNamespace`] with `Linker::func_new`
//! and see the calling instance's memory through the `Caller`.

use super::namespace::{HostCall, HostFunction, ImportNamespace};
use super::traits::{
    check_range, CompiledModule, Engine, GuestInstance, LinearMemory, NativeFunction, SharedMemory,
};
use super::value::{Value, ValueType};
use crate::error::{Result, SandboxError};
use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use wasmtime::{
    Caller, Config, Extern, Func, FuncType, Instance, Linker, Memory, Module, OptLevel,
    ResourceLimiter, Store, Val, ValType,
};

/// Name of the memory export guests are expected to provide.
const MEMORY_EXPORT: &str = "memory";

/// Upper bound on table elements a guest may grow to.
const MAX_TABLE_ELEMENTS: usize = 10_000;

/// Per-store state; enforces the memory limit.
struct HostState {
    memory_limit: usize,
}

impl ResourceLimiter for HostState {
    fn memory_growing(
        &mut self,
        current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        if desired > self.memory_limit {
            tracing::warn!(
                current_bytes = current,
                desired_bytes = desired,
                limit_bytes = self.memory_limit,
                "Guest memory grow rejected: exceeds limit"
            );
            return Ok(false);
        }
        Ok(true)
    }

    fn table_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        Ok(desired <= MAX_TABLE_ELEMENTS)
    }
}

/// wasmtime-backed [`Engine`].
#[derive(Clone)]
pub struct WasmtimeEngine {
    engine: wasmtime::Engine,
    memory_limit: usize,
}

impl WasmtimeEngine {
    /// Creates an engine whose instances may grow their memory up to
    /// `memory_limit` bytes.
    ///
    /// # Errors
    ///
    /// Returns an invalid configuration error if wasmtime rejects the config.
    pub fn new(memory_limit: usize) -> Result<Self> {
        let mut config = Config::new();
        config.cranelift_opt_level(OptLevel::Speed);

        let engine = wasmtime::Engine::new(&config).map_err(|e| {
            SandboxError::invalid_configuration("engine", format!("{e:#}"))
        })?;

        Ok(Self {
            engine,
            memory_limit,
        })
    }
}

impl fmt::Debug for WasmtimeEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WasmtimeEngine")
            .field("memory_limit", &self.memory_limit)
            .finish_non_exhaustive()
    }
}

impl Engine for WasmtimeEngine {
    fn compile(&self, bytes: &[u8]) -> Result<Arc<dyn CompiledModule>> {
        let module = Module::new(&self.engine, bytes)
            .map_err(|e| SandboxError::compilation_failed(format!("{e:#}")))?;

        tracing::debug!(
            imports = module.imports().len(),
            exports = module.exports().len(),
            "Guest module compiled"
        );

        Ok(Arc::new(WasmtimeModule {
            engine: self.engine.clone(),
            module,
            memory_limit: self.memory_limit,
        }))
    }
}

/// A compiled WebAssembly module.
struct WasmtimeModule {
    engine: wasmtime::Engine,
    module: Module,
    memory_limit: usize,
}

impl fmt::Debug for WasmtimeModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WasmtimeModule")
            .field("name", &self.module.name())
            .finish_non_exhaustive()
    }
}

impl CompiledModule for WasmtimeModule {
    fn instantiate(&self, imports: &ImportNamespace) -> Result<Arc<dyn GuestInstance>> {
        let mut linker: Linker<HostState> = Linker::new(&self.engine);
        for (group, name, function) in imports.iter() {
            link_host_function(&self.engine, &mut linker, group, name, function.clone())?;
        }

        let mut store = Store::new(
            &self.engine,
            HostState {
                memory_limit: self.memory_limit,
            },
        );
        store.limiter(|state| state);

        let instance = linker
            .instantiate(&mut store, &self.module)
            .map_err(|e| SandboxError::instantiation_failed(format!("{e:#}")))?;

        let memory = instance.get_memory(&mut store, MEMORY_EXPORT);
        let functions: HashMap<String, Func> = instance
            .exports(&mut store)
            .filter_map(|export| {
                let name = export.name().to_string();
                export.into_func().map(|func| (name, func))
            })
            .collect();

        Ok(Arc::new(WasmtimeInstance {
            store: Arc::new(Mutex::new(store)),
            memory,
            functions,
        }))
    }
}

fn link_host_function(
    engine: &wasmtime::Engine,
    linker: &mut Linker<HostState>,
    group: &str,
    name: &str,
    function: HostFunction,
) -> Result<()> {
    let ty = FuncType::new(
        engine,
        function.ty().params().iter().copied().map(to_val_type),
        function.ty().results().iter().copied().map(to_val_type),
    );
    let qualified = format!("{group}.{name}");

    linker
        .func_new(
            group,
            name,
            ty,
            move |caller: Caller<'_, HostState>, params: &[Val], results: &mut [Val]| {
                let args = params
                    .iter()
                    .map(from_val)
                    .collect::<Result<Vec<_>>>()
                    .map_err(wasmtime::Error::new)?;

                let memory = CallerMemory::new(caller);
                let call = HostCall::new(&memory);
                let values = function
                    .call(&qualified, &call, &args)
                    .map_err(wasmtime::Error::new)?;

                for (slot, value) in results.iter_mut().zip(values) {
                    *slot = to_val(value);
                }
                Ok(())
            },
        )
        .map_err(|e| SandboxError::trait_registration_failed(group, format!("{e:#}")))?;
    Ok(())
}

/// Memory of the instance currently calling into the host.
struct CallerMemory<'a> {
    caller: RefCell<Caller<'a, HostState>>,
    memory: Option<Memory>,
}

impl<'a> CallerMemory<'a> {
    fn new(mut caller: Caller<'a, HostState>) -> Self {
        let memory = caller
            .get_export(MEMORY_EXPORT)
            .and_then(Extern::into_memory);
        Self {
            caller: RefCell::new(caller),
            memory,
        }
    }

    fn memory(&self) -> Result<Memory> {
        self.memory
            .ok_or_else(|| SandboxError::memory_not_found(MEMORY_EXPORT))
    }
}

impl LinearMemory for CallerMemory<'_> {
    fn size(&self) -> usize {
        self.memory
            .map_or(0, |memory| memory.data_size(&*self.caller.borrow()))
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        let memory = self.memory()?;
        let caller = self.caller.borrow();
        check_range(offset, buf.len(), memory.data_size(&*caller))?;
        memory
            .read(&*caller, offset, buf)
            .map_err(|e| SandboxError::out_of_bounds(offset as u64, buf.len() as u64, 0).with_source(e))
    }

    fn write(&self, offset: usize, data: &[u8]) -> Result<()> {
        let memory = self.memory()?;
        let mut caller = self.caller.borrow_mut();
        check_range(offset, data.len(), memory.data_size(&*caller))?;
        memory
            .write(&mut *caller, offset, data)
            .map_err(|e| SandboxError::out_of_bounds(offset as u64, data.len() as u64, 0).with_source(e))
    }
}

/// An instantiated WebAssembly module with its own store.
struct WasmtimeInstance {
    store: Arc<Mutex<Store<HostState>>>,
    memory: Option<Memory>,
    functions: HashMap<String, Func>,
}

impl fmt::Debug for WasmtimeInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WasmtimeInstance")
            .field("has_memory", &self.memory.is_some())
            .field("exports", &self.functions.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl GuestInstance for WasmtimeInstance {
    fn memory(&self, name: &str) -> Result<SharedMemory> {
        match self.memory {
            Some(memory) if name == MEMORY_EXPORT => Ok(Arc::new(WasmtimeMemory {
                store: self.store.clone(),
                memory,
            })),
            _ => Err(SandboxError::memory_not_found(name)),
        }
    }

    fn function(&self, name: &str) -> Result<NativeFunction> {
        let func = *self
            .functions
            .get(name)
            .ok_or_else(|| SandboxError::export_not_found(name))?;
        let store = self.store.clone();
        let export = name.to_string();

        Ok(NativeFunction::new(name, move |args| {
            let mut store = store.lock();
            let params: Vec<Val> = args.iter().copied().map(to_val).collect();
            let mut results = vec![Val::I32(0); func.ty(&*store).results().len()];

            func.call(&mut *store, &params, &mut results)
                .map_err(|e| match e.downcast_ref::<SandboxError>() {
                    Some(host_error) => host_error.clone(),
                    None => SandboxError::call_failed(&export, format!("{e:#}")),
                })?;

            results.iter().map(from_val).collect()
        }))
    }
}

/// Host-side view of an instance memory, usable between calls.
struct WasmtimeMemory {
    store: Arc<Mutex<Store<HostState>>>,
    memory: Memory,
}

impl LinearMemory for WasmtimeMemory {
    fn size(&self) -> usize {
        self.memory.data_size(&*self.store.lock())
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        let store = self.store.lock();
        check_range(offset, buf.len(), self.memory.data_size(&*store))?;
        self.memory
            .read(&*store, offset, buf)
            .map_err(|e| SandboxError::out_of_bounds(offset as u64, buf.len() as u64, 0).with_source(e))
    }

    fn write(&self, offset: usize, data: &[u8]) -> Result<()> {
        let mut store = self.store.lock();
        check_range(offset, data.len(), self.memory.data_size(&*store))?;
        self.memory
            .write(&mut *store, offset, data)
            .map_err(|e| SandboxError::out_of_bounds(offset as u64, data.len() as u64, 0).with_source(e))
    }
}

fn to_val_type(ty: ValueType) -> ValType {
    match ty {
        ValueType::I32 => ValType::I32,
        ValueType::I64 => ValType::I64,
        ValueType::F32 => ValType::F32,
        ValueType::F64 => ValType::F64,
    }
}

fn to_val(value: Value) -> Val {
    match value {
        Value::I32(v) => Val::I32(v),
        Value::I64(v) => Val::I64(v),
        Value::F32(v) => Val::F32(v.to_bits()),
        Value::F64(v) => Val::F64(v.to_bits()),
    }
}

fn from_val(val: &Val) -> Result<Value> {
    match val {
        Val::I32(v) => Ok(Value::I32(*v)),
        Val::I64(v) => Ok(Value::I64(*v)),
        Val::F32(bits) => Ok(Value::F32(f32::from_bits(*bits))),
        Val::F64(bits) => Ok(Value::F64(f64::from_bits(*bits))),
        other => Err(SandboxError::invalid_argument(
            "value",
            format!("unsupported boundary value {other:?}"),
        )),
    }
}
