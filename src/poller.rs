use std::{
    ops::{Deref, DerefMut},
    time::Duration,
};

use thiserror::Error;
use tracing::debug;

use crate::metric::MetricBuilder;
use crate::settings::Settings;
use crate::sink::MetricSink;
use crate::variables::{Device, Variables};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("server replied ERR {0}")]
    Server(String),
    #[error("unexpected response {0:?}")]
    Protocol(String),
}

// Failure of a whole poll cycle, tagged with the phase that failed.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("connect: {0}")]
    Connect(#[source] ClientError),
    #[error("auth: {0}")]
    Auth(#[source] ClientError),
    #[error("getupslist: {0}")]
    List(#[source] ClientError),
}

pub trait UpsClient {
    fn authenticate(&mut self, username: &str, password: &str) -> Result<(), ClientError>;
    fn list_devices(&mut self) -> Result<Vec<Device>, ClientError>;
    fn disconnect(&mut self);
}

pub trait Connector {
    type Client: UpsClient;

    fn connect(
        &self,
        server: &str,
        port: u16,
        connect_timeout: Duration,
        op_timeout: Duration,
    ) -> Result<Self::Client, ClientError>;
}

/// Disconnects the wrapped client when dropped.
pub struct Session<C: UpsClient> {
    client: C,
}

impl<C: UpsClient> Session<C> {
    pub fn new(client: C) -> Session<C> {
        Session { client }
    }
}

impl<C: UpsClient> Deref for Session<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.client
    }
}

impl<C: UpsClient> DerefMut for Session<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.client
    }
}

impl<C: UpsClient> Drop for Session<C> {
    fn drop(&mut self) {
        self.client.disconnect();
    }
}

pub struct Upsd<N: Connector> {
    settings: Settings,
    connector: N,
    builder: MetricBuilder,
}

impl<N: Connector> Upsd<N> {
    pub fn new(settings: Settings, connector: N) -> Upsd<N> {
        Upsd {
            settings,
            connector,
            builder: MetricBuilder::new(),
        }
    }

    /// Runs one cycle, emitting a metric per device in server order.
    /// Nothing is emitted when the cycle fails.
    pub fn gather(&self, sink: &mut dyn MetricSink) -> Result<usize, PollError> {
        let devices = self.fetch_devices()?;
        let count = devices.len();

        for device in devices {
            let variables = Variables::normalize(device.variables);
            let metric = self.builder.build(&device.name, &variables);
            sink.add_fields(&self.settings.measurement, &metric.fields, &metric.tags);
        }

        Ok(count)
    }

    fn fetch_devices(&self) -> Result<Vec<Device>, PollError> {
        let s = &self.settings;
        debug!("Connecting to {}:{}.", s.server, s.port);
        let client = self
            .connector
            .connect(
                &s.server,
                s.port,
                Duration::from_secs(s.connection_timeout),
                Duration::from_secs(s.op_timeout),
            )
            .map_err(PollError::Connect)?;
        let mut session = Session::new(client);

        if s.has_credentials() {
            session
                .authenticate(&s.username, &s.password)
                .map_err(PollError::Auth)?;
        }

        let devices = session.list_devices().map_err(PollError::List)?;
        debug!("Server reported {} UPS.", devices.len());

        Ok(devices)
    }

    #[cfg(test)]
    pub fn builder(&self) -> &MetricBuilder {
        &self.builder
    }
}
