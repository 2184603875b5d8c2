//! Core module binding
//!
//! Loads a core (a WASM module implementing the fixed export interface),
//! resolves its entry-point table, and owns its lifetime. The binding is
//! the single owner of the instance; cores are assumed non-reentrant and
//! every call into one goes through `&mut self` here, serialized further up
//! by the session lock.
//!
//! Opaque blobs (content, serialized state) move through a *transfer
//! window* in linear memory: a region starting at the address reported by
//! the optional `transfer_ptr` export (0 when absent) that the core treats
//! as host scratch space. The host grows memory as needed to fit it.

use anyhow::anyhow;
use wasmtime::{Engine, Instance, Linker, Memory, Module, Store, TypedFunc};

use crate::callbacks::{FrameCallbacks, PixelFormat};
use crate::error::{BindingError, OpenError, SerializeError};
use crate::ffi;

/// Size of one WASM linear-memory page.
const WASM_PAGE: usize = 64 * 1024;

/// Shared engine for compiling and running core modules.
pub struct CoreEngine {
    engine: Engine,
}

impl CoreEngine {
    pub fn new() -> Self {
        Self {
            engine: Engine::default(),
        }
    }

    pub(crate) fn engine(&self) -> &Engine {
        &self.engine
    }
}

impl Default for CoreEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-instance host state stored in the wasmtime `Store`.
///
/// This is the explicit context object threaded through every call into the
/// core: callback imports reach the session's callbacks through it instead
/// of any process-wide registry.
pub(crate) struct HostContext {
    /// The core's linear memory (set after instantiation).
    pub(crate) memory: Option<Memory>,
    /// Session callbacks; present only while content is open.
    pub(crate) callbacks: Option<Box<dyn FrameCallbacks>>,
    /// Pixel format last negotiated by the core.
    pub(crate) pixel_format: PixelFormat,
}

impl HostContext {
    fn new() -> Self {
        Self {
            memory: None,
            callbacks: None,
            pixel_format: PixelFormat::default(),
        }
    }
}

/// Timing and region information reported by the core after content load.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AvInfo {
    /// Video frame rate in frames per second.
    pub frame_rate: f64,
    /// Audio sample rate in Hz.
    pub sample_rate: f64,
    /// Raw region code: 0 = NTSC, 1 = PAL.
    pub region: u32,
}

/// The resolved entry-point table.
struct EntryPoints {
    init: TypedFunc<(), ()>,
    deinit: TypedFunc<(), ()>,
    load_content: TypedFunc<(u32, u32), u32>,
    unload_content: TypedFunc<(), ()>,
    run_frame: TypedFunc<(), ()>,
    reset: TypedFunc<(), ()>,
    // Serialization support is optional, as a trio.
    serialize_size: Option<TypedFunc<(), u32>>,
    serialize: Option<TypedFunc<(u32, u32), u32>>,
    unserialize: Option<TypedFunc<(u32, u32), u32>>,
    // Optional niceties.
    transfer_ptr: Option<TypedFunc<(), u32>>,
    set_device: Option<TypedFunc<(u32, u32), ()>>,
    frame_rate: Option<TypedFunc<(), f64>>,
    sample_rate: Option<TypedFunc<(), f64>>,
    region: Option<TypedFunc<(), u32>>,
    keyboard_event: Option<TypedFunc<(u32, u32, u32), ()>>,
}

impl EntryPoints {
    fn resolve(
        instance: &Instance,
        store: &mut Store<HostContext>,
    ) -> Result<Self, BindingError> {
        fn required<P, R>(
            instance: &Instance,
            store: &mut Store<HostContext>,
            name: &'static str,
        ) -> Result<TypedFunc<P, R>, BindingError>
        where
            P: wasmtime::WasmParams,
            R: wasmtime::WasmResults,
        {
            instance
                .get_typed_func::<P, R>(&mut *store, name)
                .map_err(|_| BindingError::MissingExport(name))
        }

        Ok(Self {
            init: required(instance, store, "init")?,
            deinit: required(instance, store, "deinit")?,
            load_content: required(instance, store, "load_content")?,
            unload_content: required(instance, store, "unload_content")?,
            run_frame: required(instance, store, "run_frame")?,
            reset: required(instance, store, "reset")?,
            serialize_size: instance.get_typed_func(&mut *store, "serialize_size").ok(),
            serialize: instance.get_typed_func(&mut *store, "serialize").ok(),
            unserialize: instance.get_typed_func(&mut *store, "unserialize").ok(),
            transfer_ptr: instance.get_typed_func(&mut *store, "transfer_ptr").ok(),
            set_device: instance.get_typed_func(&mut *store, "set_device").ok(),
            frame_rate: instance.get_typed_func(&mut *store, "frame_rate").ok(),
            sample_rate: instance.get_typed_func(&mut *store, "sample_rate").ok(),
            region: instance.get_typed_func(&mut *store, "region").ok(),
            keyboard_event: instance.get_typed_func(&mut *store, "keyboard_event").ok(),
        })
    }
}

/// A loaded core module.
///
/// Exclusive owner of the instance and its store. Torn down exactly once:
/// `unload` (or `Drop`) calls the core's `deinit` export and releases the
/// instance.
pub struct CoreBinding {
    store: Store<HostContext>,
    /// Kept alive for the lifetime of the resolved functions and memory.
    #[allow(dead_code)]
    instance: Instance,
    entries: EntryPoints,
    memory: Memory,
    transfer_ptr: u32,
    initialized: bool,
}

impl CoreBinding {
    /// Compile, instantiate and initialize a core from module bytes.
    ///
    /// Fails with [`BindingError`] if the bytes are not a loadable module
    /// or a required export is missing; nothing is left partially
    /// initialized on failure.
    pub fn load(engine: &CoreEngine, module_bytes: &[u8]) -> Result<Self, BindingError> {
        let module =
            Module::new(engine.engine(), module_bytes).map_err(BindingError::InvalidModule)?;

        let mut linker = Linker::new(engine.engine());
        ffi::register_callback_imports(&mut linker).map_err(BindingError::Instantiate)?;

        let mut store = Store::new(engine.engine(), HostContext::new());
        let instance = linker
            .instantiate(&mut store, &module)
            .map_err(BindingError::Instantiate)?;

        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or(BindingError::MissingExport("memory"))?;
        store.data_mut().memory = Some(memory);

        let entries = EntryPoints::resolve(&instance, &mut store)?;

        let transfer_ptr = match entries.transfer_ptr.clone() {
            Some(f) => f.call(&mut store, ()).map_err(|e| BindingError::Call {
                entry: "transfer_ptr",
                cause: e,
            })?,
            None => 0,
        };

        entries.init.call(&mut store, ()).map_err(|e| BindingError::Call {
            entry: "init",
            cause: e,
        })?;

        log::info!(
            "core loaded: {} bytes of wasm, transfer window at {:#x}",
            module_bytes.len(),
            transfer_ptr
        );

        Ok(Self {
            store,
            instance,
            entries,
            memory,
            transfer_ptr,
            initialized: true,
        })
    }

    /// True between a successful [`load`](Self::load) and [`unload`](Self::unload).
    pub fn is_loaded(&self) -> bool {
        self.initialized
    }

    /// Tear the core down. Invokes `deinit` the first time only; safe to
    /// call repeatedly, and called from `Drop`.
    pub fn unload(&mut self) {
        if !self.initialized {
            return;
        }
        if let Err(e) = self.entries.deinit.call(&mut self.store, ()) {
            log::warn!("core deinit trapped during unload: {e}");
        }
        self.initialized = false;
        log::debug!("core torn down");
    }

    /// Whether the core exports the full serialization trio.
    pub fn serialization_supported(&self) -> bool {
        self.entries.serialize_size.is_some()
            && self.entries.serialize.is_some()
            && self.entries.unserialize.is_some()
    }

    /// Attach or detach the session callbacks threaded through the store.
    pub(crate) fn set_callbacks(&mut self, callbacks: Option<Box<dyn FrameCallbacks>>) {
        self.store.data_mut().callbacks = callbacks;
    }

    /// Pixel format last negotiated by the core.
    pub fn pixel_format(&self) -> PixelFormat {
        self.store.data().pixel_format
    }

    /// Load content into the core through the transfer window.
    pub(crate) fn open_content(&mut self, content: &[u8]) -> Result<(), OpenError> {
        let start = self
            .ensure_window(content.len())
            .map_err(OpenError::Call)?;
        self.memory.data_mut(&mut self.store)[start..start + content.len()]
            .copy_from_slice(content);

        let status = self
            .entries
            .load_content
            .call(&mut self.store, (start as u32, content.len() as u32))
            .map_err(OpenError::Call)?;
        if status == 0 {
            return Err(OpenError::Rejected);
        }
        Ok(())
    }

    /// Unload content from the core. Traps are logged, not propagated:
    /// closing always succeeds from the host's point of view.
    pub(crate) fn close_content(&mut self) {
        if let Err(e) = self.entries.unload_content.call(&mut self.store, ()) {
            log::warn!("core unload_content trapped: {e}");
        }
    }

    /// Query timing and region info (valid after content load).
    pub(crate) fn av_info(&mut self) -> Result<AvInfo, BindingError> {
        let frame_rate =
            self.call_optional_f64(self.entries.frame_rate.clone(), "frame_rate", 60.0)?;
        let sample_rate =
            self.call_optional_f64(self.entries.sample_rate.clone(), "sample_rate", 44_100.0)?;
        let region = match self.entries.region.clone() {
            Some(f) => f.call(&mut self.store, ()).map_err(|e| BindingError::Call {
                entry: "region",
                cause: e,
            })?,
            None => 0,
        };
        Ok(AvInfo {
            frame_rate,
            sample_rate,
            region,
        })
    }

    fn call_optional_f64(
        &mut self,
        func: Option<TypedFunc<(), f64>>,
        entry: &'static str,
        default: f64,
    ) -> Result<f64, BindingError> {
        match func {
            Some(f) => f
                .call(&mut self.store, ())
                .map_err(|e| BindingError::Call { entry, cause: e }),
            None => Ok(default),
        }
    }

    /// Advance the core exactly one frame. The core synchronously invokes
    /// the session callbacks while this call is on the stack.
    pub(crate) fn run_frame(&mut self) -> Result<(), BindingError> {
        self.entries
            .run_frame
            .call(&mut self.store, ())
            .map_err(|e| BindingError::Call {
                entry: "run_frame",
                cause: e,
            })
    }

    /// Reset the running game.
    pub(crate) fn reset(&mut self) -> Result<(), BindingError> {
        self.entries
            .reset
            .call(&mut self.store, ())
            .map_err(|e| BindingError::Call {
                entry: "reset",
                cause: e,
            })
    }

    /// Assign a device class to an input port. No-op for cores that do not
    /// export `set_device`.
    pub(crate) fn set_device(&mut self, port: u32, device: u32) -> Result<(), BindingError> {
        match self.entries.set_device.clone() {
            Some(f) => f
                .call(&mut self.store, (port, device))
                .map_err(|e| BindingError::Call {
                    entry: "set_device",
                    cause: e,
                }),
            None => Ok(()),
        }
    }

    /// Deliver a keyboard event to the core (optional export).
    pub(crate) fn send_keyboard_event(
        &mut self,
        down: bool,
        keycode: u32,
        character: u32,
    ) -> Result<(), BindingError> {
        match self.entries.keyboard_event.clone() {
            Some(f) => f
                .call(&mut self.store, (u32::from(down), keycode, character))
                .map_err(|e| BindingError::Call {
                    entry: "keyboard_event",
                    cause: e,
                }),
            None => Ok(()),
        }
    }

    /// Current serialized-state size reported by the core.
    pub(crate) fn serialize_size(&mut self) -> Result<usize, SerializeError> {
        let f = self
            .entries
            .serialize_size
            .clone()
            .ok_or(SerializeError::Unsupported)?;
        let size = f.call(&mut self.store, ()).map_err(|e| SerializeError::Call {
            entry: "serialize_size",
            cause: e,
        })?;
        Ok(size as usize)
    }

    /// Ask the core to write its full state into `buf`.
    pub(crate) fn serialize_into(&mut self, buf: &mut [u8]) -> Result<(), SerializeError> {
        let f = self
            .entries
            .serialize
            .clone()
            .ok_or(SerializeError::Unsupported)?;
        let start = self
            .ensure_window(buf.len())
            .map_err(|cause| SerializeError::Call {
                entry: "serialize",
                cause,
            })?;
        let status = f
            .call(&mut self.store, (start as u32, buf.len() as u32))
            .map_err(|e| SerializeError::Call {
                entry: "serialize",
                cause: e,
            })?;
        if status == 0 {
            return Err(SerializeError::Rejected { entry: "serialize" });
        }
        buf.copy_from_slice(&self.memory.data(&self.store)[start..start + buf.len()]);
        Ok(())
    }

    /// Push a full serialized state back into the core.
    pub(crate) fn unserialize(&mut self, state: &[u8]) -> Result<(), SerializeError> {
        let f = self
            .entries
            .unserialize
            .clone()
            .ok_or(SerializeError::Unsupported)?;
        let start = self
            .ensure_window(state.len())
            .map_err(|cause| SerializeError::Call {
                entry: "unserialize",
                cause,
            })?;
        self.memory.data_mut(&mut self.store)[start..start + state.len()].copy_from_slice(state);
        let status = f
            .call(&mut self.store, (start as u32, state.len() as u32))
            .map_err(|e| SerializeError::Call {
                entry: "unserialize",
                cause: e,
            })?;
        if status == 0 {
            return Err(SerializeError::Rejected {
                entry: "unserialize",
            });
        }
        Ok(())
    }

    /// Make sure the transfer window can hold `len` bytes, growing linear
    /// memory when needed. Returns the window's byte offset.
    fn ensure_window(&mut self, len: usize) -> anyhow::Result<usize> {
        let start = self.transfer_ptr as usize;
        let need = start
            .checked_add(len)
            .ok_or_else(|| anyhow!("transfer window overflows the address space"))?;
        let have = self.memory.data_size(&self.store);
        if need > have {
            let delta = (need - have).div_ceil(WASM_PAGE) as u64;
            self.memory.grow(&mut self.store, delta)?;
        }
        Ok(start)
    }
}

impl Drop for CoreBinding {
    fn drop(&mut self) {
        self.unload();
    }
}
