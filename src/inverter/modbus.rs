//! Modbus TCP transport with the connection lifecycle the inverters need:
//! a lazy singleton context, a minimum gap between operations, and
//! drop-on-error so the next call re-establishes the link.

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::lookup_host;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout, Instant};
use tokio_modbus::client::{tcp, Context};
use tokio_modbus::prelude::*;
use tracing::{debug, warn};

/// TCP connect timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Minimum spacing between Modbus operations; the inverter firmware chokes
/// on back-to-back requests.
const INTER_OP_GAP: Duration = Duration::from_secs(1);

/// Register-level access used by the brand drivers.
#[async_trait]
pub trait RegisterBus: Send + Sync {
    async fn read_input(&self, addr: u16, count: u16) -> Result<Vec<u16>>;
    async fn read_holding(&self, addr: u16, count: u16) -> Result<Vec<u16>>;
    async fn write_holding(&self, addr: u16, value: u16) -> Result<()>;
}

pub struct ModbusLink {
    host: String,
    port: u16,
    unit_id: u8,
    response_timeout: Duration,
    state: Mutex<LinkState>,
}

#[derive(Default)]
struct LinkState {
    ctx: Option<Context>,
    last_op: Option<Instant>,
}

impl ModbusLink {
    pub fn new(host: String, port: u16, unit_id: u8, response_timeout: Duration) -> Self {
        Self {
            host,
            port,
            unit_id,
            response_timeout,
            state: Mutex::new(LinkState::default()),
        }
    }

    /// Wait out the inter-operation gap and make sure a context exists.
    async fn prepare(&self, state: &mut LinkState) -> Result<()> {
        if let Some(last) = state.last_op {
            let since = last.elapsed();
            if since < INTER_OP_GAP {
                sleep(INTER_OP_GAP - since).await;
            }
        }

        if state.ctx.is_none() {
            let target = format!("{}:{}", self.host, self.port);
            let addr = lookup_host(&target)
                .await
                .with_context(|| format!("failed to resolve {target}"))?
                .next()
                .with_context(|| format!("no address for {target}"))?;
            let mut ctx = timeout(CONNECT_TIMEOUT, tcp::connect(addr))
                .await
                .with_context(|| format!("connect to {target} timed out"))?
                .with_context(|| format!("failed to connect to {target}"))?;
            ctx.set_slave(Slave(self.unit_id));
            debug!(%target, unit_id = self.unit_id, "modbus connection established");
            state.ctx = Some(ctx);
        }
        Ok(())
    }

    /// Drop the context so the next operation reconnects.
    fn teardown(state: &mut LinkState, why: &str) {
        warn!(error = why, "dropping modbus connection");
        state.ctx = None;
    }
}

macro_rules! link_op {
    ($self:expr, $state:expr, $op:expr) => {{
        let result = timeout($self.response_timeout, $op).await;
        $state.last_op = Some(Instant::now());
        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                ModbusLink::teardown($state, &e.to_string());
                Err(anyhow::Error::new(e).context("modbus operation failed"))
            }
            Err(_) => {
                ModbusLink::teardown($state, "response timeout");
                Err(anyhow::anyhow!(
                    "modbus response timed out after {:?}",
                    $self.response_timeout
                ))
            }
        }
    }};
}

#[async_trait]
impl RegisterBus for ModbusLink {
    async fn read_input(&self, addr: u16, count: u16) -> Result<Vec<u16>> {
        let mut state = self.state.lock().await;
        self.prepare(&mut state).await?;
        let ctx = state.ctx.as_mut().context("modbus context missing after prepare")?;
        let fut = ctx.read_input_registers(addr, count);
        link_op!(self, &mut state, fut)
    }

    async fn read_holding(&self, addr: u16, count: u16) -> Result<Vec<u16>> {
        let mut state = self.state.lock().await;
        self.prepare(&mut state).await?;
        let ctx = state.ctx.as_mut().context("modbus context missing after prepare")?;
        let fut = ctx.read_holding_registers(addr, count);
        link_op!(self, &mut state, fut)
    }

    async fn write_holding(&self, addr: u16, value: u16) -> Result<()> {
        let mut state = self.state.lock().await;
        self.prepare(&mut state).await?;
        let ctx = state.ctx.as_mut().context("modbus context missing after prepare")?;
        let fut = ctx.write_single_register(addr, value);
        link_op!(self, &mut state, fut)
    }
}

/// Big-endian 32-bit decode across a register pair.
pub fn u32_be(high: u16, low: u16) -> u32 {
    ((high as u32) << 16) | low as u32
}

/// Sign-extend a 16-bit register.
pub fn i16_from(raw: u16) -> i32 {
    if raw > 32767 {
        raw as i32 - 65536
    } else {
        raw as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u32_decode_is_high_word_first() {
        assert_eq!(u32_be(0x0001, 0x0000), 65536);
        assert_eq!(u32_be(0x0000, 0x1234), 0x1234);
        assert_eq!(u32_be(0xFFFF, 0xFFFF), u32::MAX);
    }

    #[test]
    fn i16_sign_extension() {
        assert_eq!(i16_from(0), 0);
        assert_eq!(i16_from(32767), 32767);
        assert_eq!(i16_from(32768), -32768);
        assert_eq!(i16_from(65535), -1);
        assert_eq!(i16_from(65516), -20);
    }
}
