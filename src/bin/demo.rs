//! Voltage ICS Demo
//!
//! A water tank and a two-light semaphore, each behind its own PLC. A SCADA
//! polls both and mirrors the tank's pump and valve onto the lights.
//!
//! Usage: cargo run --bin demo [--live] [seconds]
//! Example: RUST_LOG=debug cargo run --bin demo -- 10

use std::time::Duration;

use tracing_subscriber::EnvFilter;
use voltage_ics::models::{LightLog, Semaphore, TankController, WaterTank};
use voltage_ics::{
    LiveConfig, LiveRuntime, ModbusResult, NoControl, PlantConfig, PlantScheduler,
    PlcApplication, ScadaApplication, ScadaConfig, ScadaContext, SimConfig, Simulation, VarType,
};

fn mirror_lights(ctx: &mut ScadaContext<'_>) -> ModbusResult<()> {
    let pump = ctx.value("pump").unwrap_or(0);
    let valve = ctx.value("valve").unwrap_or(0);
    ctx.write([("pump_light", pump), ("valve_light", valve)]);
    Ok(())
}

fn build_scada(tank: std::net::Ipv4Addr, lights: std::net::Ipv4Addr) -> ModbusResult<ScadaApplication> {
    let mut scada = ScadaApplication::new("scada", mirror_lights, ScadaConfig::default());
    scada.add_rtu(tank);
    scada.add_rtu(lights);
    scada.add_variable(tank, "level", VarType::InputRegister, WaterTank::LEVEL_SENSOR_POS)?;
    scada.add_variable(tank, "pump", VarType::Coil, WaterTank::PUMP_POS)?;
    scada.add_variable(tank, "valve", VarType::Coil, WaterTank::VALVE_POS)?;
    scada.add_variable(lights, "pump_light", VarType::Coil, Semaphore::PUMP_LIGHT_POS)?;
    scada.add_variable(lights, "valve_light", VarType::Coil, Semaphore::VALVE_LIGHT_POS)?;
    Ok(scada)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut live = false;
    let mut seconds = 20;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--live" => live = true,
            other => seconds = other.parse()?,
        }
    }
    let horizon = Duration::from_secs(seconds);

    println!("🚀 {}", voltage_ics::info());
    println!("=============================");

    let log = LightLog::default();
    let mut plant = PlantScheduler::new(PlantConfig::default());
    let mut tank = PlcApplication::new("water_tank", TankController::default(), &mut plant);
    tank.link_process(&mut plant, WaterTank::new(), 2)?;
    let mut lights = PlcApplication::new("semaphore", NoControl, &mut plant);
    lights.link_process(&mut plant, Semaphore::with_log(log.clone()), 1)?;

    if live {
        println!("🔌 Live TCP run for {:?}", horizon);
        let config = LiveConfig::new().with_port(0).with_horizon(horizon);
        let mut runtime = LiveRuntime::new(config, plant)?;
        let tank = runtime.add_plc(tank)?;
        let lights = runtime.add_plc(lights)?;
        let scada = build_scada(
            runtime.plc_address(tank).ok_or("tank has no address")?,
            runtime.plc_address(lights).ok_or("semaphore has no address")?,
        )?;
        let scada = runtime.add_scada(scada);
        runtime.run().await?;
        report(runtime.scada(scada), runtime.plant().ticks());
    } else {
        println!("⏱️  Simulated run for {:?}", horizon);
        let mut sim = Simulation::new(SimConfig::new().with_horizon(horizon), plant)?;
        let tank = sim.add_plc(tank)?;
        let lights = sim.add_plc(lights)?;
        let scada = build_scada(
            sim.plc_address(tank).ok_or("tank has no address")?,
            sim.plc_address(lights).ok_or("semaphore has no address")?,
        )?;
        let scada = sim.add_scada(scada);
        sim.run()?;
        report(sim.scada(scada), sim.plant().ticks());
    }

    let samples = log.borrow();
    let switches = samples
        .windows(2)
        .filter(|pair| pair[0].pump_light != pair[1].pump_light)
        .count();
    println!("\n🚦 Semaphore: {} samples, pump light switched {} time(s)", samples.len(), switches);
    if let Some(last) = samples.last() {
        println!(
            "    at {:?}: pump {} valve {}",
            last.time,
            if last.pump_light { "ON" } else { "OFF" },
            if last.valve_light { "ON" } else { "OFF" }
        );
    }

    println!("\n🎉 Demo completed!");
    Ok(())
}

fn report(scada: Option<&ScadaApplication>, ticks: u64) {
    println!("\n📊 Plant ticks: {}", ticks);
    let Some(scada) = scada else {
        return;
    };
    println!("  SCADA control runs: {}", scada.control_runs());
    for (name, var) in scada.vars() {
        println!("    {:<12} = {}", name, var.value());
    }
    let stats = scada.stats();
    println!(
        "  Frames sent: {}, received: {}, dropped: {}",
        stats.frames_sent, stats.frames_received, stats.frames_dropped
    );
}
