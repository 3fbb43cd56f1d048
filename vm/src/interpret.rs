use crate::{
    backend::Backend,
    cursor::Cursor,
    op::{Op, Operand},
    state::VmState,
};
use tracing::{instrument, trace};

#[derive(Clone, Copy, Debug)]
pub struct VmConfig {
    /// The maximum number of instructions to run per subroutine call.
    ///
    /// When this is reached the VM halts early, so a malformed program can never hang the simulation.
    pub max_instructions: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_instructions: 512,
        }
    }
}

/// Why a run stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Halt {
    /// Reached an [Op::End]
    End,
    /// A [Op::Kill] was taken
    Killed,
    /// Ran off the end of the bytecode
    Exhausted,
    /// Hit [VmConfig::max_instructions]
    Budget,
}

#[derive(Clone, Debug)]
pub struct Vm {
    max_instructions: usize,
    state: VmState,
}

impl Vm {
    pub fn new(config: VmConfig, registers: usize) -> Self {
        Self {
            max_instructions: config.max_instructions,
            state: VmState {
                registers: vec![0.0; registers],
                ..Default::default()
            },
        }
    }

    pub fn resize_registers(&mut self, registers: usize) {
        self.state.registers.clear();
        self.state.registers.resize(registers, 0.0);
    }

    pub fn registers(&self) -> &[f32] {
        &self.state.registers
    }

    /// Whether the last run took a [Op::Kill]
    pub fn killed(&self) -> bool {
        self.state.killed
    }

    /// Run the subroutine starting at byte `offset` of `bytecode` against `backend`.
    #[instrument(level = "trace", skip(self, bytecode, backend))]
    pub fn run<B: Backend>(&mut self, bytecode: &[u8], offset: usize, backend: &mut B) -> Halt {
        self.reset(offset);
        let mut cursor = Cursor::new(bytecode, offset);
        let halt = loop {
            if self.state.total_for_run >= self.max_instructions {
                break Halt::Budget;
            }
            let Some(op) = cursor.next_op() else {
                break Halt::Exhausted;
            };
            self.state.pc = cursor.position();
            self.state.total_for_run += 1;
            if let Some(halt) = self.step(op, backend) {
                break halt;
            }
        };

        #[cfg(feature = "tracing")]
        tracy_client::plot!("vm instructions", self.state.total_for_run as f64);

        halt
    }

    fn step<B: Backend>(&mut self, op: Op, backend: &mut B) -> Option<Halt> {
        match op {
            Op::End => return Some(Halt::End),
            Op::Noop(byte) => trace!(byte, pc = self.state.pc, "skipping unknown opcode"),
            Op::Mov(dst, a) => {
                let value = self.read(a, backend);
                self.write(dst, value, backend);
            }
            Op::Binary(op, dst, a, b) => {
                let value = op.apply(self.read(a, backend), self.read(b, backend));
                self.write(dst, value, backend);
            }
            Op::Unary(op, dst, a) => {
                let value = op.apply(self.read(a, backend));
                self.write(dst, value, backend);
            }
            Op::Kill(a) => {
                if self.condition(a, backend) {
                    self.state.killed = true;
                    return Some(Halt::Killed);
                }
            }
            Op::Instance(a) => {
                if self.condition(a, backend) {
                    backend.instance();
                }
            }
        }
        None
    }

    /// Resolve an operand to a value. Anything that cannot be resolved reads as zero.
    fn read<B: Backend>(&self, operand: Operand, backend: &B) -> f32 {
        match operand {
            Operand::Literal(value) => value,
            Operand::Constant(name) => backend.constant(name).unwrap_or(0.0),
            Operand::Channel(name) => backend.channel(name).unwrap_or(0.0),
            Operand::Register(i) => self.state.registers.get(i as usize).copied().unwrap_or(0.0),
            Operand::Input(i) => backend.input(i as usize).unwrap_or(0.0),
            Operand::None | Operand::Output(_) | Operand::Invalid(_) => 0.0,
        }
    }

    /// An absent condition operand counts as true
    fn condition<B: Backend>(&self, operand: Operand, backend: &B) -> bool {
        operand.is_none() || self.read(operand, backend) != 0.0
    }

    fn write<B: Backend>(&mut self, dst: Operand, value: f32, backend: &mut B) {
        match dst {
            Operand::Channel(name) => backend.set_channel(name, value),
            Operand::Output(i) => backend.set_output(i as usize, value),
            Operand::Register(i) => match self.state.registers.get_mut(i as usize) {
                Some(register) => *register = value,
                None => trace!(register = i, "dropping write to missing register"),
            },
            other => trace!(%other, "dropping write to read-only operand"),
        }
    }

    /// Prepare for the next run
    fn reset(&mut self, offset: usize) {
        self.state.pc = offset;
        self.state.total_for_run = 0;
        self.state.killed = false;
        self.state.registers.fill(0.0);
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new(VmConfig::default(), 0)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use proptest::prelude::*;

    use super::{Halt, Vm, VmConfig};
    use crate::{
        backend::{Backend, NoopBackend},
        name::Name,
        op::{BinaryOp, Op, Operand, UnaryOp},
    };

    #[derive(Default)]
    struct TestBackend {
        constants: HashMap<Name, f32>,
        channels: HashMap<Name, f32>,
        inputs: Vec<f32>,
        outputs: Vec<f32>,
        instances: Vec<Vec<f32>>,
    }

    impl Backend for TestBackend {
        fn constant(&self, name: Name) -> Option<f32> {
            self.constants.get(&name).copied()
        }
        fn channel(&self, name: Name) -> Option<f32> {
            self.channels.get(&name).copied()
        }
        fn set_channel(&mut self, name: Name, value: f32) {
            if let Some(slot) = self.channels.get_mut(&name) {
                *slot = value;
            }
        }
        fn input(&self, index: usize) -> Option<f32> {
            self.inputs.get(index).copied()
        }
        fn set_output(&mut self, index: usize, value: f32) {
            if let Some(slot) = self.outputs.get_mut(index) {
                *slot = value;
            }
        }
        fn instance(&mut self) {
            self.instances.push(self.outputs.clone());
        }
    }

    fn bytecode(ops: &[Op]) -> Vec<u8> {
        ops.iter().flat_map(|op| op.encode()).collect()
    }

    proptest! {
        #[test]
        fn test_never_panics(
            bytecode in prop::collection::vec(prop::bits::u8::ANY, 0..512),
            offset in 0..600usize,
        ) {
            let mut vm = Vm::new(VmConfig::default(), 4);
            vm.run(&bytecode, offset, &mut NoopBackend);
        }
    }

    #[test]
    fn test_arithmetic_through_registers() {
        let life = Name::new("life");
        let mut backend = TestBackend {
            channels: HashMap::from([(life, 1.0)]),
            inputs: vec![0.25],
            ..Default::default()
        };
        let code = bytecode(&[
            Op::Binary(BinaryOp::Mul, Operand::Register(0), Operand::Input(0), Operand::Literal(2.0)),
            Op::Binary(BinaryOp::Sub, Operand::Channel(life), Operand::Channel(life), Operand::Register(0)),
            Op::End,
        ]);
        let mut vm = Vm::new(VmConfig::default(), 1);
        assert_eq!(vm.run(&code, 0, &mut backend), Halt::End);
        assert_eq!(backend.channels[&life], 0.5);
        assert_eq!(vm.registers(), &[0.5]);
    }

    #[test]
    fn test_unknown_names_read_as_zero() {
        let known = Name::new("known");
        let mut backend = TestBackend {
            channels: HashMap::from([(known, 7.0)]),
            ..Default::default()
        };
        let code = bytecode(&[
            Op::Binary(
                BinaryOp::Add,
                Operand::Channel(known),
                Operand::Constant(Name::new("missing")),
                Operand::Channel(Name::new("missing")),
            ),
            Op::Mov(Operand::Channel(Name::new("missing")), Operand::Literal(3.0)),
        ]);
        let mut vm = Vm::default();
        assert_eq!(vm.run(&code, 0, &mut backend), Halt::Exhausted);
        assert_eq!(backend.channels[&known], 0.0);
        assert_eq!(backend.channels.len(), 1);
    }

    #[test]
    fn test_out_of_range_register_is_dropped() {
        let code = bytecode(&[
            Op::Mov(Operand::Register(9), Operand::Literal(1.0)),
            Op::Unary(UnaryOp::Neg, Operand::Register(0), Operand::Register(9)),
        ]);
        let mut vm = Vm::new(VmConfig::default(), 1);
        vm.run(&code, 0, &mut NoopBackend);
        assert_eq!(vm.registers(), &[-0.0]);
    }

    #[test]
    fn test_kill_halts_when_condition_holds() {
        let flag = Name::new("flag");
        let mut backend = TestBackend {
            channels: HashMap::from([(flag, 0.0)]),
            ..Default::default()
        };
        let code = bytecode(&[
            Op::Kill(Operand::Literal(0.0)),
            Op::Kill(Operand::None),
            Op::Mov(Operand::Channel(flag), Operand::Literal(1.0)),
        ]);
        let mut vm = Vm::default();
        assert_eq!(vm.run(&code, 0, &mut backend), Halt::Killed);
        assert!(vm.killed());
        assert_eq!(backend.channels[&flag], 0.0);

        // the flag does not leak into the next run
        let code = bytecode(&[Op::End]);
        vm.run(&code, 0, &mut backend);
        assert!(!vm.killed());
    }

    #[test]
    fn test_instances_commit_staged_outputs() {
        let mut backend = TestBackend {
            outputs: vec![0.0; 2],
            ..Default::default()
        };
        let code = bytecode(&[
            Op::Mov(Operand::Output(0), Operand::Literal(1.0)),
            Op::Instance(Operand::None),
            Op::Mov(Operand::Output(1), Operand::Literal(2.0)),
            Op::Instance(Operand::Literal(0.0)),
            Op::Instance(Operand::Literal(1.0)),
            Op::Mov(Operand::Output(5), Operand::Literal(9.0)),
            Op::End,
        ]);
        Vm::default().run(&code, 0, &mut backend);
        assert_eq!(backend.instances, vec![vec![1.0, 0.0], vec![1.0, 2.0]]);
    }

    #[test]
    fn test_budget_halts_long_streams() {
        let code = bytecode(&vec![Op::Noop(0xEE); 64]);
        let mut vm = Vm::new(VmConfig { max_instructions: 10 }, 0);
        assert_eq!(vm.run(&code, 0, &mut NoopBackend), Halt::Budget);
    }

    #[test]
    fn test_starts_at_offset() {
        let code = bytecode(&[Op::Kill(Operand::None), Op::End]);
        let mut vm = Vm::default();
        assert_eq!(vm.run(&code, crate::op::INSTRUCTION_SIZE, &mut NoopBackend), Halt::End);
        assert_eq!(vm.run(&code, 0, &mut NoopBackend), Halt::Killed);
    }
}
