#[derive(Clone, Debug, Default)]
pub struct VmState {
    /// Byte offset of the next instruction in the bytecode
    ///
    /// Starts at the subroutine offset and advances one instruction at a time.
    pub pc: usize,
    /// The total instructions processed. Resets to 0 after each run.
    pub total_for_run: usize,
    /// Transient computation registers. Cleared before each run.
    pub registers: Vec<f32>,
    /// Set by a taken [crate::op::Op::Kill]
    pub killed: bool,
}
