//! Contracts between the plant, the PLCs and the SCADA
//!
//! - [`PhysicalProcess`]: physics bound to one PLC's register files
//! - [`PlcControl`]: the PLC's control routine, run after every physics tick
//! - [`ScadaControl`]: supervisory logic, run once a poll cycle has completed

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::debug;

use crate::command::WriteCommand;
use crate::error::ModbusResult;
use crate::register::PlcState;
use crate::variable::{Var, VarType};

/// A physical process linked to a PLC.
///
/// `advance` reads the actuator commands in `outputs` and writes measurements
/// into `inputs`. `now` is the harness clock.
pub trait PhysicalProcess {
    fn advance(&mut self, now: Duration, inputs: &mut PlcState, outputs: &PlcState)
        -> ModbusResult<()>;
}

/// Control routine of a PLC
pub trait PlcControl {
    fn update(&mut self, measured: &PlcState, outputs: &mut PlcState) -> ModbusResult<()>;
}

impl<F> PlcControl for F
where
    F: FnMut(&PlcState, &mut PlcState) -> ModbusResult<()>,
{
    fn update(&mut self, measured: &PlcState, outputs: &mut PlcState) -> ModbusResult<()> {
        self(measured, outputs)
    }
}

/// A PLC that only serves its registers
#[derive(Debug, Clone, Copy, Default)]
pub struct NoControl;

impl PlcControl for NoControl {
    fn update(&mut self, _measured: &PlcState, _outputs: &mut PlcState) -> ModbusResult<()> {
        Ok(())
    }
}

/// Supervisory logic of a SCADA
pub trait ScadaControl {
    fn update(&mut self, ctx: &mut ScadaContext<'_>) -> ModbusResult<()>;
}

impl<F> ScadaControl for F
where
    F: FnMut(&mut ScadaContext<'_>) -> ModbusResult<()>,
{
    fn update(&mut self, ctx: &mut ScadaContext<'_>) -> ModbusResult<()> {
        self(ctx)
    }
}

/// A SCADA that only collects values
#[derive(Debug, Clone, Copy, Default)]
pub struct NoScadaControl;

impl ScadaControl for NoScadaControl {
    fn update(&mut self, _ctx: &mut ScadaContext<'_>) -> ModbusResult<()> {
        Ok(())
    }
}

/// Variables and write queue handed to [`ScadaControl::update`]
pub struct ScadaContext<'a> {
    vars: &'a mut BTreeMap<String, Var>,
    queue: &'a mut Vec<WriteCommand>,
}

impl<'a> ScadaContext<'a> {
    pub(crate) fn new(vars: &'a mut BTreeMap<String, Var>, queue: &'a mut Vec<WriteCommand>) -> Self {
        Self { vars, queue }
    }

    /// All variables by name
    pub fn vars(&self) -> &BTreeMap<String, Var> {
        &*self.vars
    }

    /// Current value of a variable
    pub fn value(&self, name: &str) -> Option<u16> {
        self.vars.get(name).map(Var::value)
    }

    /// Set a SCADA-local variable
    pub fn set_local(&mut self, name: &str, value: u16) {
        match self.vars.get_mut(name) {
            Some(var) if var.var_type() == VarType::LocalVariable => var.set_value(value),
            Some(_) => debug!("'{}' is not a local variable", name),
            None => {
                self.vars.insert(name.to_string(), Var::local(value));
            }
        }
    }

    /// Request coil writes, see [`queue_writes`]
    pub fn write<'n, I>(&mut self, values: I)
    where
        I: IntoIterator<Item = (&'n str, u16)>,
    {
        queue_writes(self.vars, self.queue, values);
    }

    /// Writes queued so far
    pub fn pending_writes(&self) -> &[WriteCommand] {
        &self.queue[..]
    }
}

/// Queue one coil write per named Coil variable whose value would change.
///
/// A write is skipped when it matches the variable's current value or a
/// proposal already in flight. Unknown names and non-coil variables are
/// ignored. Queued variables are marked changed until the RTU echoes the write.
pub fn queue_writes<'n, I>(vars: &mut BTreeMap<String, Var>, queue: &mut Vec<WriteCommand>, values: I)
where
    I: IntoIterator<Item = (&'n str, u16)>,
{
    for (name, value) in values {
        let Some(var) = vars.get_mut(name) else {
            debug!("Write to unknown variable '{}' ignored", name);
            continue;
        };
        if var.var_type() != VarType::Coil {
            debug!("Write to non-coil variable '{}' ignored", name);
            continue;
        }
        if !var.differs_from(value) {
            continue;
        }
        queue.push(WriteCommand::new(
            u16::from(var.position()),
            value,
            var.unit_id(),
        ));
        var.propose(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> BTreeMap<String, Var> {
        let mut vars = BTreeMap::new();
        vars.insert("pump".into(), Var::new("pump", VarType::Coil, 0, 1).unwrap());
        vars.insert(
            "level".into(),
            Var::new("level", VarType::InputRegister, 0, 1).unwrap(),
        );
        vars
    }

    #[test]
    fn test_write_dedup() {
        let mut vars = vars();
        let mut queue = Vec::new();

        queue_writes(&mut vars, &mut queue, [("pump", 0)]);
        assert!(queue.is_empty());

        queue_writes(&mut vars, &mut queue, [("pump", 1)]);
        queue_writes(&mut vars, &mut queue, [("pump", 1)]);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].encoded_value(), 0xFF00);
        assert_eq!(queue[0].unit_id(), 1);
        assert!(vars["pump"].is_changed());
    }

    #[test]
    fn test_write_ignores_unknown_and_inputs() {
        let mut vars = vars();
        let mut queue = Vec::new();
        queue_writes(&mut vars, &mut queue, [("missing", 1), ("level", 5)]);
        assert!(queue.is_empty());
        assert_eq!(vars["level"].value(), 0);
    }

    #[test]
    fn test_context_and_closure_control() {
        let mut vars = vars();
        let mut queue = Vec::new();
        let mut control = |ctx: &mut ScadaContext<'_>| -> ModbusResult<()> {
            if ctx.value("level") == Some(0) {
                ctx.write([("pump", 1)]);
            }
            ctx.set_local("cycles", 1);
            Ok(())
        };

        let mut ctx = ScadaContext::new(&mut vars, &mut queue);
        ScadaControl::update(&mut control, &mut ctx).unwrap();
        assert_eq!(ctx.pending_writes().len(), 1);
        assert_eq!(ctx.value("cycles"), Some(1));
    }

    #[test]
    fn test_closure_plc_control() {
        let mut control = |measured: &PlcState, outputs: &mut PlcState| -> ModbusResult<()> {
            outputs.set_digital(0, measured.digital(0)?)
        };
        let mut inputs = PlcState::new();
        inputs.set_digital(0, true).unwrap();
        let mut outputs = PlcState::new();
        PlcControl::update(&mut control, &inputs, &mut outputs).unwrap();
        assert!(outputs.digital(0).unwrap());

        PlcControl::update(&mut NoControl, &inputs, &mut outputs).unwrap();
    }
}
