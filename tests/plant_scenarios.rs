//! End-to-end behaviour of PLCs and SCADAs wired through the public API

use std::net::Ipv4Addr;
use std::time::Duration;

use bytes::Bytes;
use voltage_ics::models::{TankController, WaterTank};
use voltage_ics::{
    AduBuilder, FunctionCode, LinkId, ModbusResult, NoControl, NoScadaControl, PlantConfig,
    PlantScheduler, PlcApplication, ScadaApplication, ScadaConfig, ScadaContext, SimConfig,
    Simulation, VarType,
};

const TANK: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
const LIGHTS: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 2);

fn serving_plc(name: &str, plant: &mut PlantScheduler, link: LinkId) -> PlcApplication {
    let mut plc = PlcApplication::new(name, NoControl, plant);
    plc.start().unwrap();
    plc.accept(link).unwrap();
    plc
}

/// Feed every frame in `frames` to `plc` and collect its replies
fn serve(plc: &mut PlcApplication, frames: &[(LinkId, Bytes)]) -> Vec<(LinkId, Bytes)> {
    let mut replies = Vec::new();
    for (link, frame) in frames {
        plc.handle_receive(*link, frame, &mut replies).unwrap();
    }
    replies
}

#[test]
fn test_tank_below_low_threshold_starts_pump() {
    let mut plant = PlantScheduler::new(PlantConfig::default());
    let mut plc = PlcApplication::new("wt", TankController::default(), &mut plant);
    plc.link_process(&mut plant, WaterTank::with_level(0.1), 1)
        .unwrap();

    let mut sim = Simulation::new(SimConfig::default(), plant).unwrap();
    let wt = sim.add_plc(plc).unwrap();
    let address = sim.plc_address(wt).unwrap();

    let mut scada = ScadaApplication::new(
        "scada",
        NoScadaControl,
        ScadaConfig::new().with_poll_interval(Duration::from_millis(100)),
    );
    scada.add_rtu(address);
    scada.add_variable(address, "pump", VarType::Coil, 0).unwrap();
    scada.add_variable(address, "valve", VarType::Coil, 1).unwrap();
    scada
        .add_variable(address, "level", VarType::InputRegister, 0)
        .unwrap();
    let scada = sim.add_scada(scada);

    sim.run_until(Duration::from_millis(150)).unwrap();

    let scada = sim.scada(scada).unwrap();
    assert_eq!(scada.value("pump"), Some(1));
    assert_eq!(scada.value("valve"), Some(0));
    assert!(scada.value("level").unwrap() > 0);
    assert!(sim.plc(wt).unwrap().snapshot().outputs.digital(WaterTank::PUMP_POS).unwrap());
}

#[test]
fn test_coil_write_is_queued_once_and_flushed() {
    let mut plant = PlantScheduler::default();
    let mut lights = serving_plc("lights", &mut plant, 7);

    let mut scada = ScadaApplication::new("scada", NoScadaControl, ScadaConfig::default());
    scada.add_rtu(LIGHTS);
    scada
        .add_variable(LIGHTS, "pump_light", VarType::Coil, 3)
        .unwrap();

    scada.write([("pump_light", 1)]);
    assert_eq!(scada.queued_writes().len(), 1);
    assert_eq!(scada.queued_writes()[0].address(), 3);
    assert_eq!(scada.queued_writes()[0].unit_id(), 1);

    scada.write([("pump_light", 1)]);
    assert_eq!(scada.queued_writes().len(), 1);

    scada.start();
    scada.attach(0, 7).unwrap();
    let mut requests = Vec::new();
    assert_eq!(scada.read_cycle(&mut requests).unwrap(), 1);

    let replies = serve(&mut lights, &requests);
    let mut writes = Vec::new();
    for (link, reply) in &replies {
        scada.handle_receive(*link, reply, &mut writes).unwrap();
    }
    assert_eq!(writes.len(), 1);
    assert!(scada.queued_writes().is_empty());

    let echoes = serve(&mut lights, &writes);
    assert!(lights.snapshot().outputs.digital(3).unwrap());
    let mut nothing = Vec::new();
    for (link, echo) in &echoes {
        scada.handle_receive(*link, echo, &mut nothing).unwrap();
    }
    assert!(nothing.is_empty());
    assert_eq!(scada.value("pump_light"), Some(1));

    scada.write([("pump_light", 1)]);
    assert!(scada.queued_writes().is_empty());
}

#[test]
fn test_control_waits_for_every_reply() {
    let mut plant = PlantScheduler::default();
    let mut tank = serving_plc("tank", &mut plant, 1);
    let mut lights = serving_plc("lights", &mut plant, 2);

    let control = |_ctx: &mut ScadaContext<'_>| -> ModbusResult<()> { Ok(()) };
    let mut scada = ScadaApplication::new("scada", control, ScadaConfig::default());
    scada.add_rtu(TANK);
    scada.add_rtu(LIGHTS);
    scada.add_variable(TANK, "pump", VarType::Coil, 0).unwrap();
    scada
        .add_variable(TANK, "level", VarType::InputRegister, 0)
        .unwrap();
    scada
        .add_variable(LIGHTS, "pump_light", VarType::Coil, 0)
        .unwrap();
    scada.start();
    scada.attach(0, 1).unwrap();
    scada.attach(1, 2).unwrap();

    let mut requests = Vec::new();
    assert_eq!(scada.read_cycle(&mut requests).unwrap(), 3);
    let (to_tank, to_lights): (Vec<_>, Vec<_>) =
        requests.into_iter().partition(|(link, _)| *link == 1);

    let mut out = Vec::new();
    for (link, reply) in serve(&mut tank, &to_tank) {
        scada.handle_receive(link, &reply, &mut out).unwrap();
    }
    assert_eq!(scada.pending(), 1);
    assert_eq!(scada.control_runs(), 0);

    // The next cycle gives up on the missing reply and closes the barrier
    let mut second = Vec::new();
    assert_eq!(scada.read_cycle(&mut second).unwrap(), 3);
    assert_eq!(scada.control_runs(), 1);
    assert_eq!(scada.pending(), 3);

    // A reply to the abandoned read is dropped
    for (link, reply) in serve(&mut lights, &to_lights) {
        scada.handle_receive(link, &reply, &mut out).unwrap();
    }
    assert_eq!(scada.pending(), 3);
    assert_eq!(scada.control_runs(), 1);

    let (second_tank, second_lights): (Vec<_>, Vec<_>) =
        second.into_iter().partition(|(link, _)| *link == 1);
    for (link, reply) in serve(&mut tank, &second_tank) {
        scada.handle_receive(link, &reply, &mut out).unwrap();
    }
    assert_eq!(scada.pending(), 1);
    assert_eq!(scada.control_runs(), 1);

    for (link, reply) in serve(&mut lights, &second_lights) {
        scada.handle_receive(link, &reply, &mut out).unwrap();
    }
    assert_eq!(scada.pending(), 0);
    assert_eq!(scada.control_runs(), 2);
}

#[test]
fn test_read_the_plc_never_answers_does_not_stall_control() {
    let mut plant = PlantScheduler::default();
    let plc = PlcApplication::new("alarms", NoControl, &mut plant);
    let mut sim = Simulation::new(SimConfig::default(), plant).unwrap();
    let alarms = sim.add_plc(plc).unwrap();
    let address = sim.plc_address(alarms).unwrap();

    let mut scada = ScadaApplication::new(
        "scada",
        |_ctx: &mut ScadaContext<'_>| -> ModbusResult<()> { Ok(()) },
        ScadaConfig::default(),
    );
    scada.add_rtu(address);
    scada.add_variable(address, "alarm", VarType::Coil, 7).unwrap();
    let scada = sim.add_scada(scada);

    sim.run_until(Duration::from_millis(2100)).unwrap();

    let scada = sim.scada(scada).unwrap();
    let read = scada.read_command(0, FunctionCode::ReadCoils).unwrap();
    assert_eq!((read.start(), read.count()), (7, 1));
    assert_eq!(scada.control_runs(), 4);
    assert_eq!(scada.pending(), 1);
}

#[test]
fn test_request_split_across_reads() {
    let mut plant = PlantScheduler::default();
    let mut plc = serving_plc("plc", &mut plant, 4);
    plc.io().borrow_mut().outputs.set_digital(2, true).unwrap();

    let request = AduBuilder::read_request(9, 1, FunctionCode::ReadCoils, 0, 8).unwrap();
    let mut replies = Vec::new();
    for byte in request.as_bytes().chunks(1) {
        plc.handle_receive(4, byte, &mut replies).unwrap();
    }

    assert_eq!(replies.len(), 1);
    let (link, reply) = &replies[0];
    assert_eq!(*link, 4);
    assert_eq!(&reply[..], &[0, 9, 0, 0, 0, 4, 1, 1, 1, 0b0000_0100]);
}

#[test]
fn test_unsupported_requests_are_dropped() {
    let mut plant = PlantScheduler::default();
    let mut plc = serving_plc("plc", &mut plant, 0);

    let mut stream = vec![0, 1, 0, 0, 0, 6, 1, 3, 0, 0, 0, 1];
    stream.extend_from_slice(
        AduBuilder::read_request(2, 1, FunctionCode::ReadInputRegisters, 0, 2)
            .unwrap()
            .as_bytes(),
    );

    let mut replies = Vec::new();
    plc.handle_receive(0, &stream, &mut replies).unwrap();
    assert_eq!(replies.len(), 1);
    assert_eq!(&replies[0].1[..2], &[0, 2]);
    assert_eq!(plc.stats().frames_dropped, 1);
}
