// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! PipeWire thread management and event handling.
//!
//! Everything that touches the node or the hardware mixer runs on this
//! thread's main loop: registry events, the bound node's info and param
//! events, and readiness of the ALSA mixer descriptor.

use crate::audio::alsa_mixer::AlsaMixer;
use crate::audio::props::{build_channel_volumes_pod, NodeProps};
use crate::config::Config;
use libspa::support::system::IoFlags;
use piper_sync::{GlobalAction, MixerError, NodeWatcher, SyncOptions, Synchronizer, VolumeSink};
use pipewire::node::{Node, NodeListener};
use pipewire::spa::param::ParamType;
use pipewire::spa::pod::Pod;
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, trace, warn};

/// Commands sent to the PipeWire thread.
#[derive(Debug, Clone)]
pub enum PwCommand {
    Shutdown,
}

/// Events sent from the PipeWire thread.
#[derive(Debug, Clone)]
pub enum PwEvent {
    /// Connected, mixer open, watching for the node.
    Ready,
    /// Startup failed; the thread has exited.
    Error(String),
    /// The main loop returned.
    Stopped,
}

#[derive(Debug, Error)]
pub enum PwError {
    #[error("PipeWire initialization failed: {0}")]
    InitFailed(String),
    #[error("Failed to connect to PipeWire: {0}")]
    ConnectionFailed(String),
    #[error("PipeWire thread error: {0}")]
    ThreadError(String),
    #[error("ALSA mixer initialization failed: {0}")]
    Mixer(#[from] MixerError),
}

struct BoundNode {
    id: u32,
    proxy: Node,
    _listener: NodeListener,
}

impl BoundNode {
    fn request_props(&self) {
        self.proxy.enum_params(0, Some(ParamType::Props), 0, u32::MAX);
    }
}

impl VolumeSink for BoundNode {
    fn set_channel_volumes(&self, volumes: &[f32]) -> Result<(), String> {
        let pod_data = build_channel_volumes_pod(volumes).map_err(|e| e.to_string())?;
        let pod = Pod::from_bytes(&pod_data)
            .ok_or_else(|| "Failed to create Pod from bytes".to_string())?;

        self.proxy.set_param(ParamType::Props, 0, pod);
        trace!("Native volume set on node {}: {:?}", self.id, volumes);
        Ok(())
    }
}

struct LoopState {
    watcher: NodeWatcher,
    node: Option<BoundNode>,
    sync: Synchronizer<AlsaMixer>,
}

impl LoopState {
    fn on_node_props(&mut self, props: NodeProps) {
        if let Err(e) = self.sync.on_node_volumes(&props.channel_volumes) {
            warn!("Failed to apply node volume to hardware: {}", e);
        }
        if let Some(muted) = props.mute {
            if let Err(e) = self.sync.on_node_mute(muted) {
                warn!("Failed to apply node mute to hardware: {}", e);
            }
        }
    }

    fn on_mixer_ready(&mut self) {
        if let Err(e) = self.sync.hardware_mut().drain_events() {
            warn!("Failed to handle mixer events: {}", e);
        }
        let sink = self.node.as_ref().map(|node| node as &dyn VolumeSink);
        if let Err(e) = self.sync.on_hardware_change(sink) {
            warn!("Failed to read hardware level: {}", e);
        }
    }
}

/// Handle to the PipeWire thread.
pub struct PwThread {
    cmd_tx: pipewire::channel::Sender<PwCommand>,
    handle: Option<JoinHandle<()>>,
}

impl PwThread {
    /// Spawn the PipeWire thread.
    pub fn spawn(config: Config, event_tx: UnboundedSender<PwEvent>) -> Result<Self, PwError> {
        let (cmd_tx, cmd_rx) = pipewire::channel::channel::<PwCommand>();

        let handle = thread::Builder::new()
            .name("pipewire".to_string())
            .spawn(move || {
                match run_pipewire_loop(&config, cmd_rx, &event_tx) {
                    Ok(()) => {
                        let _ = event_tx.send(PwEvent::Stopped);
                    }
                    Err(e) => {
                        error!("PipeWire thread error: {}", e);
                        let _ = event_tx.send(PwEvent::Error(e.to_string()));
                    }
                }
            })
            .map_err(|e| PwError::ThreadError(e.to_string()))?;

        Ok(Self {
            cmd_tx,
            handle: Some(handle),
        })
    }

    /// Send a command to the PipeWire thread.
    pub fn send(&self, cmd: PwCommand) -> Result<(), PwError> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| PwError::ThreadError("Channel closed".to_string()))
    }

    /// Shutdown the PipeWire thread.
    pub fn shutdown(mut self) {
        let _ = self.send(PwCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PwThread {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(PwCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_pipewire_loop(
    config: &Config,
    cmd_rx: pipewire::channel::Receiver<PwCommand>,
    event_tx: &UnboundedSender<PwEvent>,
) -> Result<(), PwError> {
    pipewire::init();
    info!("PipeWire initialized");

    let main_loop = pipewire::main_loop::MainLoopRc::new(None)
        .map_err(|e| PwError::InitFailed(e.to_string()))?;

    let context = pipewire::context::ContextRc::new(&main_loop, None)
        .map_err(|e| PwError::InitFailed(e.to_string()))?;

    let core = context
        .connect_rc(None)
        .map_err(|e| PwError::ConnectionFailed(e.to_string()))?;

    let registry = core
        .get_registry_rc()
        .map_err(|e| PwError::ConnectionFailed(e.to_string()))?;

    info!("Connected to PipeWire");

    let mixer = AlsaMixer::init(&config.mixer)?;
    let mixer_fd = mixer.poll_fd()?;

    let state = Rc::new(RefCell::new(LoopState {
        watcher: NodeWatcher::new(config.node.name.as_str()),
        node: None,
        sync: Synchronizer::new(mixer, SyncOptions::from(&config.sync)),
    }));

    let state_io = Rc::downgrade(&state);
    let io_source = main_loop.loop_().add_io(mixer_fd, IoFlags::IN, move |_fd| {
        if let Some(state) = state_io.upgrade() {
            state.borrow_mut().on_mixer_ready();
        }
    });

    let main_loop_weak = main_loop.downgrade();
    let cmd_receiver = cmd_rx.attach(main_loop.loop_(), move |cmd| match cmd {
        PwCommand::Shutdown => {
            debug!("Received shutdown command");
            if let Some(main_loop) = main_loop_weak.upgrade() {
                main_loop.quit();
            }
        }
    });

    let registry_listener = setup_registry_listener(&registry, &state);

    info!("Watching for node '{}'", config.node.name);
    let _ = event_tx.send(PwEvent::Ready);

    main_loop.run();

    info!("PipeWire thread shutting down");

    // Unwind in reverse order of acquisition.
    state.borrow_mut().node = None;
    drop(registry_listener);
    drop(registry);
    drop(io_source);
    state.borrow_mut().sync.hardware_mut().cleanup();
    drop(cmd_receiver);
    drop(core);
    drop(context);
    drop(main_loop);

    Ok(())
}

fn bind_node_from_global(
    global: &pipewire::registry::GlobalObject<&pipewire::spa::utils::dict::DictRef>,
    registry: &pipewire::registry::RegistryRc,
    state: Weak<RefCell<LoopState>>,
) -> Result<BoundNode, String> {
    let node_id = global.id;
    debug!("Binding node proxy for node {}", node_id);

    let node: Node = registry
        .bind(global)
        .map_err(|e| format!("Failed to bind node {}: {:?}", node_id, e))?;

    let state_info = state.clone();
    let state_param = state;
    let listener = node
        .add_listener_local()
        .info(move |_info| {
            let Some(state) = state_info.upgrade() else {
                return;
            };
            if let Some(node) = state.borrow().node.as_ref() {
                node.request_props();
            }
        })
        .param(move |_seq, id, _index, _next, param| {
            if id != ParamType::Props {
                return;
            }
            let Some(pod) = param else {
                return;
            };
            let props = match NodeProps::decode(pod.as_bytes()) {
                Ok(props) => props,
                Err(e) => {
                    trace!("Ignoring props of node {}: {}", node_id, e);
                    return;
                }
            };
            if let Some(state) = state_param.upgrade() {
                state.borrow_mut().on_node_props(props);
            }
        })
        .register();

    info!("Bound node {} for volume sync", node_id);
    Ok(BoundNode {
        id: node_id,
        proxy: node,
        _listener: listener,
    })
}

fn setup_registry_listener(
    registry: &pipewire::registry::RegistryRc,
    state: &Rc<RefCell<LoopState>>,
) -> pipewire::registry::Listener {
    let state_add = Rc::downgrade(state);
    let state_remove = Rc::downgrade(state);
    let registry_clone = registry.clone();

    registry
        .add_listener_local()
        .global(move |global| {
            use pipewire::types::ObjectType;

            if global.type_ != ObjectType::Node {
                return;
            }
            let Some(state) = state_add.upgrade() else {
                return;
            };

            let name = global.props.and_then(|props| props.get("node.name"));
            let mut state_ref = state.borrow_mut();
            if state_ref.watcher.on_global(global.id, name) != GlobalAction::Bind {
                return;
            }

            match bind_node_from_global(global, &registry_clone, Rc::downgrade(&state)) {
                Ok(node) => {
                    node.request_props();
                    state_ref.node = Some(node);
                }
                Err(e) => {
                    warn!("{}", e);
                    state_ref.watcher.bind_failed(global.id);
                }
            }
        })
        .global_remove(move |id| {
            let Some(state) = state_remove.upgrade() else {
                return;
            };
            let mut state = state.borrow_mut();
            if state.watcher.on_global_remove(id) {
                state.node = None;
                state.sync.reset_node();
            }
        })
        .register()
}
