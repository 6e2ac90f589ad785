//! Gateway: links, message router and heartbeat ticker.
//!
//! Every configured adapter runs as a serial link task. Messages
//! reassembled by any link flow into a single router thread, which keeps
//! node liveness in the registry up to date, optionally logs the traffic
//! and forwards it to a consumer. A ticker thread sends the heartbeat
//! signal to every link.

use crate::config::{ConfigError, GatewayConfig};
use crate::registry::NodeRegistry;
use nocan::Message;
use nocan_serial::{Delivery, LinkError, LinkHandle, Opener, Port, SerialTask, Signal, TaskOptions, TaskThreads};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("link error: {0}")]
    Link(#[from] LinkError),

    #[error("failed to spawn thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("no link for device {0}")]
    UnknownDevice(String),

    #[error("link {0} is not running")]
    LinkDown(String),
}

/// Collects opened links before the gateway starts.
pub struct GatewayBuilder {
    registry: Arc<NodeRegistry>,
    options: TaskOptions,
    heartbeat_interval: Duration,
    log_port: bool,
    forward: Option<Sender<Message>>,
    tasks: Vec<SerialTask>,
}

impl GatewayBuilder {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        let defaults = GatewayConfig::default();
        GatewayBuilder {
            registry,
            options: TaskOptions::default(),
            heartbeat_interval: defaults.heartbeat_interval(),
            log_port: defaults.log_port,
            forward: None,
            tasks: Vec::new(),
        }
    }

    /// Options for links opened after this call.
    pub fn task_options(mut self, options: TaskOptions) -> Self {
        self.options = options;
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn log_port(mut self, enabled: bool) -> Self {
        self.log_port = enabled;
        self
    }

    /// Hand every routed message to `sink` as well.
    pub fn forward_to(mut self, sink: Sender<Message>) -> Self {
        self.forward = Some(sink);
        self
    }

    /// Open a link; a device that cannot be opened is not retried.
    pub fn open(&mut self, opener: impl Opener + 'static) -> Result<LinkHandle, GatewayError> {
        let task = SerialTask::open(opener, self.options.clone())?;
        let handle = task.handle();
        self.tasks.push(task);
        Ok(handle)
    }

    /// Spawn the links, the router and the heartbeat ticker.
    pub fn start(self) -> Result<Gateway, GatewayError> {
        let GatewayBuilder {
            registry,
            heartbeat_interval,
            log_port,
            forward,
            tasks,
            ..
        } = self;

        let (inbound_tx, inbound_rx) = mpsc::channel();
        let mut links = Vec::with_capacity(tasks.len());

        for task in tasks {
            let (sender, input) = mpsc::channel();
            let handle = task.handle();
            let threads = task
                .spawn(Port {
                    input,
                    output: inbound_tx.clone(),
                })
                .map_err(GatewayError::Spawn)?;

            links.push(Link {
                handle,
                sender,
                threads,
            });
        }
        // the router ends once every read loop has dropped its sender
        drop(inbound_tx);

        let router = Router {
            registry: registry.clone(),
            log_port,
            forward,
        };
        let router = thread::Builder::new()
            .name("nocan-router".into())
            .spawn(move || router.run(inbound_rx))
            .map_err(GatewayError::Spawn)?;

        let (stop, ticks) = mpsc::channel();
        let senders = links.iter().map(|link| link.sender.clone()).collect();
        let heartbeat = thread::Builder::new()
            .name("nocan-heartbeat".into())
            .spawn(move || heartbeat(ticks, senders, heartbeat_interval))
            .map_err(GatewayError::Spawn)?;

        info!(links = links.len(), "Gateway started");

        Ok(Gateway {
            registry,
            links,
            router,
            heartbeat,
            stop,
        })
    }
}

struct Link {
    handle: LinkHandle,
    sender: Sender<Delivery>,
    threads: TaskThreads,
}

/// A running gateway.
pub struct Gateway {
    registry: Arc<NodeRegistry>,
    links: Vec<Link>,
    router: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
    stop: Sender<()>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("links", &self.links().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Open every configured interface and start.
    pub fn from_config(config: &GatewayConfig, registry: Arc<NodeRegistry>) -> Result<Self, GatewayError> {
        config.validate()?;

        let mut options = TaskOptions::default();
        options.rescue_interval = config.rescue_interval();

        let mut builder = GatewayBuilder::new(registry)
            .task_options(options)
            .heartbeat_interval(config.heartbeat_interval())
            .log_port(config.log_port);

        for interface in &config.interfaces {
            builder.open(interface.opener())?;
        }

        builder.start()
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn links(&self) -> impl Iterator<Item = &LinkHandle> {
        self.links.iter().map(|link| &link.handle)
    }

    pub fn link(&self, device: &str) -> Option<&LinkHandle> {
        self.links().find(|handle| handle.device() == device)
    }

    /// Queue `message` for transmission on the link of `device`.
    pub fn send(&self, device: &str, message: Message) -> Result<(), GatewayError> {
        let link = self
            .links
            .iter()
            .find(|link| link.handle.device() == device)
            .ok_or_else(|| GatewayError::UnknownDevice(device.to_owned()))?;

        link.sender
            .send(Delivery::Message(message))
            .map_err(|_| GatewayError::LinkDown(device.to_owned()))
    }

    /// Block until every link has stopped.
    ///
    /// Links stop when shut down through their handles or [`Gateway::shutdown`].
    pub fn wait(self) {
        let Gateway {
            links,
            router,
            heartbeat,
            stop,
            ..
        } = self;

        // the router runs until the last read loop is gone
        if router.join().is_err() {
            error!("Router thread panicked");
        }

        drop(stop);
        if heartbeat.join().is_err() {
            error!("Heartbeat thread panicked");
        }

        for link in links {
            let device = link.handle.device().to_owned();
            drop(link.sender);
            if link.threads.join().is_err() {
                error!(device, "Link thread panicked");
            }
        }
    }

    /// Stop the links and wait for every thread to finish.
    ///
    /// Links notice the shutdown within their read timeout, or once the
    /// current reopen delay has passed while rescuing.
    pub fn shutdown(self) {
        info!("Gateway shutting down");
        for link in &self.links {
            link.handle.shutdown();
        }
        self.wait();
        info!("Gateway stopped");
    }
}

struct Router {
    registry: Arc<NodeRegistry>,
    log_port: bool,
    forward: Option<Sender<Message>>,
}

impl Router {
    fn run(mut self, inbound: Receiver<Message>) {
        for message in inbound.iter() {
            let node = message.node();

            if !self.registry.touch(node) {
                debug!(%node, "Message from unregistered node");
            }

            if self.log_port {
                info!(
                    %node,
                    id = message.id.identifier(),
                    len = message.data.len(),
                    data = %hex::encode(&message.data),
                    "Received message"
                );
            }

            if let Some(sink) = &self.forward {
                if sink.send(message).is_err() {
                    warn!("Message consumer is gone");
                    self.forward = None;
                }
            }
        }
        debug!("Router stopped");
    }
}

fn heartbeat(stop: Receiver<()>, links: Vec<Sender<Delivery>>, interval: Duration) {
    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {
                debug!("Heartbeat");
                for link in &links {
                    // a stopped link is joined by the owner
                    let _ = link.send(Delivery::Signal(Signal::Heartbeat));
                }
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}
