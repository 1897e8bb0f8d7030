//! Live TCP runtime
//!
//! Drives the same PLC and SCADA state machines as the simulation, but over
//! real sockets and the wall clock. Socket I/O runs in spawned tasks; every
//! application callback runs on the task awaiting [`LiveRuntime::run`], so the
//! applications never need to be `Send`.
//!
//! Each PLC gets a logical address from [`LiveConfig::network`] and listens on
//! its own socket. PLC `n` binds `port + n`, or an OS-chosen port when the
//! configured port is 0. SCADAs name RTUs by logical address.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use crate::config::{host_address, LiveConfig};
use crate::error::{ModbusError, ModbusResult};
use crate::plant::PlantScheduler;
use crate::plc::PlcApplication;
use crate::scada::ScadaApplication;
use crate::sim::{Endpoint, PlcId, ScadaId};
use crate::transport::LinkId;

const READ_CHUNK: usize = 1024;

#[derive(Debug)]
enum NetEvent {
    Accepted { plc: PlcId, stream: TcpStream },
    Data { link: LinkId, bytes: Bytes },
    Closed { link: LinkId },
    Poll { scada: ScadaId },
}

/// Sockets and tasks owned by one run
#[derive(Debug)]
struct Network {
    events: UnboundedSender<NetEvent>,
    writers: HashMap<LinkId, UnboundedSender<Bytes>>,
    owners: HashMap<LinkId, Endpoint>,
    tasks: Vec<JoinHandle<()>>,
    next_link: LinkId,
}

impl Network {
    fn new(events: UnboundedSender<NetEvent>) -> Self {
        Self {
            events,
            writers: HashMap::new(),
            owners: HashMap::new(),
            tasks: Vec::new(),
            next_link: 0,
        }
    }

    /// Split `stream` into a reader task and a writer task
    fn open(&mut self, stream: TcpStream, owner: Endpoint) -> LinkId {
        let link = self.next_link;
        self.next_link += 1;

        if let Err(e) = stream.set_nodelay(true) {
            debug!("link {}: set_nodelay failed: {}", link, e);
        }
        let (mut reader, mut writer) = stream.into_split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Bytes>();

        let events = self.events.clone();
        self.tasks.push(tokio::spawn(async move {
            let mut buf = BytesMut::with_capacity(READ_CHUNK);
            loop {
                buf.reserve(READ_CHUNK);
                match reader.read_buf(&mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let bytes = buf.split().freeze();
                        if events.send(NetEvent::Data { link, bytes }).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        debug!("link {} read error: {}", link, e);
                        break;
                    }
                }
            }
            let _ = events.send(NetEvent::Closed { link });
        }));

        self.tasks.push(tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = writer.write_all(&frame).await {
                    debug!("link {} write error: {}", link, e);
                    break;
                }
            }
        }));

        self.writers.insert(link, out_tx);
        self.owners.insert(link, owner);
        link
    }

    fn close(&mut self, link: LinkId) -> Option<Endpoint> {
        self.writers.remove(&link);
        self.owners.remove(&link)
    }

    fn shutdown(&mut self) {
        self.writers.clear();
        self.owners.clear();
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

/// Wall-clock harness owning the plant and every application
#[derive(Debug)]
pub struct LiveRuntime {
    config: LiveConfig,
    plant: PlantScheduler,
    plcs: Vec<PlcApplication>,
    scadas: Vec<ScadaApplication>,
}

impl LiveRuntime {
    pub fn new(config: LiveConfig, plant: PlantScheduler) -> ModbusResult<Self> {
        config.validate()?;
        plant.config().validate()?;
        Ok(Self {
            config,
            plant,
            plcs: Vec::new(),
            scadas: Vec::new(),
        })
    }

    /// Add a PLC and assign it the next logical address
    pub fn add_plc(&mut self, mut plc: PlcApplication) -> ModbusResult<PlcId> {
        let id = self.plcs.len();
        let address = host_address(self.config.network, self.config.prefix_len, id as u32 + 1)?;
        plc.set_address(address);
        self.plcs.push(plc);
        Ok(id)
    }

    pub fn plc_address(&self, id: PlcId) -> Option<Ipv4Addr> {
        self.plcs.get(id)?.address()
    }

    pub fn add_scada(&mut self, scada: ScadaApplication) -> ScadaId {
        self.scadas.push(scada);
        self.scadas.len() - 1
    }

    pub fn plc(&self, id: PlcId) -> Option<&PlcApplication> {
        self.plcs.get(id)
    }

    pub fn scada(&self, id: ScadaId) -> Option<&ScadaApplication> {
        self.scadas.get(id)
    }

    pub fn plant(&self) -> &PlantScheduler {
        &self.plant
    }

    fn listen_port(&self, id: PlcId) -> ModbusResult<u16> {
        if self.config.port == 0 {
            return Ok(0);
        }
        u16::try_from(id)
            .ok()
            .and_then(|offset| self.config.port.checked_add(offset))
            .ok_or_else(|| ModbusError::configuration("PLC listen ports exceed 65535"))
    }

    /// Run until the horizon elapses, or forever without one.
    ///
    /// Fatal errors stop every application and are returned.
    pub async fn run(&mut self) -> ModbusResult<()> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut net = Network::new(tx);

        let result = match self.connect(&mut net).await {
            Ok(()) => self.serve(&mut net, &mut rx).await,
            Err(e) => Err(e),
        };

        net.shutdown();
        for plc in &mut self.plcs {
            plc.stop();
        }
        for scada in &mut self.scadas {
            scada.stop();
        }
        result
    }

    async fn connect(&mut self, net: &mut Network) -> ModbusResult<()> {
        let mut listen_addrs: Vec<SocketAddr> = Vec::with_capacity(self.plcs.len());
        for id in 0..self.plcs.len() {
            let port = self.listen_port(id)?;
            let listener = TcpListener::bind((self.config.bind, port)).await?;
            let local = listener.local_addr()?;
            let plc = &mut self.plcs[id];
            plc.start()?;
            info!("PLC '{}' ({:?}) bound to {}", plc.name(), plc.address(), local);
            listen_addrs.push(local);

            let events = net.events.clone();
            net.tasks.push(tokio::spawn(async move {
                loop {
                    match listener.accept().await {
                        Ok((stream, peer)) => {
                            debug!("accepted {} for PLC {}", peer, id);
                            if events.send(NetEvent::Accepted { plc: id, stream }).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("accept failed for PLC {}: {}", id, e);
                            break;
                        }
                    }
                }
            }));
        }

        for scada_id in 0..self.scadas.len() {
            self.scadas[scada_id].start();
            let addresses = self.scadas[scada_id].rtu_addresses();
            for (rtu, address) in addresses.into_iter().enumerate() {
                let plc_id = self
                    .plcs
                    .iter()
                    .position(|plc| plc.address() == Some(address))
                    .ok_or_else(|| {
                        ModbusError::connection(format!(
                            "SCADA '{}': no PLC at {}",
                            self.scadas[scada_id].name(),
                            address
                        ))
                    })?;
                let stream = TcpStream::connect(listen_addrs[plc_id]).await?;
                let link = net.open(stream, Endpoint::Scada(scada_id));
                self.scadas[scada_id].attach(rtu, link)?;
            }

            let period = self.scadas[scada_id].poll_interval();
            let events = net.events.clone();
            net.tasks.push(tokio::spawn(async move {
                let mut ticker = time::interval(period);
                loop {
                    ticker.tick().await;
                    if events.send(NetEvent::Poll { scada: scada_id }).is_err() {
                        break;
                    }
                }
            }));
        }
        Ok(())
    }

    async fn serve(
        &mut self,
        net: &mut Network,
        rx: &mut UnboundedReceiver<NetEvent>,
    ) -> ModbusResult<()> {
        let started = Instant::now();
        let horizon = self.config.horizon;
        let deadline = time::sleep(horizon.unwrap_or_default());
        tokio::pin!(deadline);

        let mut plant_active = self.plant.first_deadline().is_some();
        let tick = self.plant.tick_interval();
        let mut plant_timer = time::interval_at(started + tick, tick);

        loop {
            tokio::select! {
                _ = &mut deadline, if horizon.is_some() => {
                    info!("Live runtime reached its horizon");
                    return Ok(());
                }
                _ = plant_timer.tick(), if plant_active => {
                    plant_active = self.plant.tick(started.elapsed())?.is_some();
                }
                event = rx.recv() => {
                    let Some(event) = event else {
                        return Ok(());
                    };
                    match self.dispatch(net, event) {
                        Ok(()) => {}
                        Err(e) if !e.is_fatal() => debug!("Live runtime: {}", e),
                        Err(e) => {
                            error!("Live runtime stopping: {}", e);
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    fn dispatch(&mut self, net: &mut Network, event: NetEvent) -> ModbusResult<()> {
        match event {
            NetEvent::Accepted { plc, stream } => {
                let link = net.open(stream, Endpoint::Plc(plc));
                self.plcs[plc].accept(link)
            }
            NetEvent::Data { link, bytes } => match net.owners.get(&link).copied() {
                Some(Endpoint::Plc(id)) => {
                    self.plcs[id].handle_receive(link, &bytes, &mut net.writers)
                }
                Some(Endpoint::Scada(id)) => {
                    self.scadas[id].handle_receive(link, &bytes, &mut net.writers)
                }
                None => Ok(()),
            },
            NetEvent::Closed { link } => {
                match net.close(link) {
                    Some(Endpoint::Plc(id)) => self.plcs[id].close(link),
                    Some(Endpoint::Scada(id)) => self.scadas[id].detach(link),
                    None => {}
                }
                Ok(())
            }
            NetEvent::Poll { scada } => self.scadas[scada]
                .read_cycle(&mut net.writers)
                .map(|_| ()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PlantConfig, ScadaConfig};
    use crate::models::{TankController, WaterTank};
    use crate::process::NoScadaControl;
    use crate::variable::VarType;
    use std::time::Duration;

    #[test]
    fn test_listen_ports() {
        let runtime =
            LiveRuntime::new(LiveConfig::new().with_port(1502), PlantScheduler::default()).unwrap();
        assert_eq!(runtime.listen_port(0).unwrap(), 1502);
        assert_eq!(runtime.listen_port(3).unwrap(), 1505);

        let runtime =
            LiveRuntime::new(LiveConfig::new().with_port(0), PlantScheduler::default()).unwrap();
        assert_eq!(runtime.listen_port(7).unwrap(), 0);

        let runtime =
            LiveRuntime::new(LiveConfig::new().with_port(u16::MAX), PlantScheduler::default())
                .unwrap();
        assert!(runtime.listen_port(1).is_err());
    }

    #[tokio::test]
    async fn test_unknown_rtu_fails() {
        let config = LiveConfig::new()
            .with_port(0)
            .with_horizon(Duration::from_millis(100));
        let mut runtime = LiveRuntime::new(config, PlantScheduler::default()).unwrap();
        let mut scada = ScadaApplication::new("scada", NoScadaControl, ScadaConfig::default());
        scada.add_rtu(Ipv4Addr::new(10, 0, 0, 9));
        runtime.add_scada(scada);
        assert!(matches!(
            runtime.run().await,
            Err(ModbusError::Connection { .. })
        ));
    }

    #[tokio::test]
    async fn test_water_tank_over_tcp() {
        let mut plant =
            PlantScheduler::new(PlantConfig::new().with_tick_interval(Duration::from_millis(20)));
        let mut plc = PlcApplication::new("wt", TankController::default(), &mut plant);
        plc.link_process(&mut plant, WaterTank::with_level(0.1), 1)
            .unwrap();

        let config = LiveConfig::new()
            .with_port(0)
            .with_horizon(Duration::from_millis(600));
        let mut runtime = LiveRuntime::new(config, plant).unwrap();
        let wt = runtime.add_plc(plc).unwrap();
        let address = runtime.plc_address(wt).unwrap();

        let mut scada = ScadaApplication::new(
            "scada",
            NoScadaControl,
            ScadaConfig::new().with_poll_interval(Duration::from_millis(100)),
        );
        scada.add_rtu(address);
        scada
            .add_variable(address, "pump", VarType::Coil, WaterTank::PUMP_POS)
            .unwrap();
        scada
            .add_variable(address, "level", VarType::InputRegister, WaterTank::LEVEL_SENSOR_POS)
            .unwrap();
        let scada = runtime.add_scada(scada);

        runtime.run().await.unwrap();

        let scada = runtime.scada(scada).unwrap();
        assert_eq!(scada.value("pump"), Some(1));
        assert!(scada.value("level").unwrap() > 0);
        assert!(scada.control_runs() >= 2);
        assert!(runtime.plant().ticks() >= 10);
    }
}
