//! Qubit allocation table: maps `Value::Qubit` indices to simulator
//! amplitude slots and tracks per-qubit liveness.
//!
//! Bloch qubits are recycled rather than leaked: destroying (or losing
//! scope of) a qubit returns its simulator slot to a free list, and the
//! next `qubit` declaration reuses it after a `reset`, so the amplitude
//! vector only grows for qubits that are genuinely live at once.

use bloch_compiler::simulator::QasmSimulator;

#[derive(Debug, Clone)]
struct QubitSlot {
    sim_index: usize,
    label: String,
    measured: bool,
    outcome: Option<u8>,
    alive: bool,
}

/// Owns the simulator and the table translating Bloch-level qubit
/// handles to its amplitude indices.
pub struct QubitTable {
    sim: QasmSimulator,
    slots: Vec<QubitSlot>,
    free_list: Vec<usize>,
}

impl QubitTable {
    pub fn new() -> Self {
        QubitTable {
            sim: QasmSimulator::new(),
            slots: Vec::new(),
            free_list: Vec::new(),
        }
    }

    /// Allocates a fresh Bloch-level qubit handle, reusing a recycled
    /// slot (and its simulator index) when one is free.
    pub fn allocate(&mut self, label: String) -> usize {
        if let Some(handle) = self.free_list.pop() {
            let slot = &mut self.slots[handle];
            slot.label = label;
            slot.measured = false;
            slot.outcome = None;
            slot.alive = true;
            self.sim.reset(slot.sim_index);
            return handle;
        }
        let sim_index = self.sim.allocate_qubit();
        self.slots.push(QubitSlot {
            sim_index,
            label,
            measured: false,
            outcome: None,
            alive: true,
        });
        self.slots.len() - 1
    }

    fn sim_index(&self, handle: usize) -> usize {
        self.slots[handle].sim_index
    }

    pub fn label(&self, handle: usize) -> &str {
        &self.slots[handle].label
    }

    pub fn is_measured(&self, handle: usize) -> bool {
        self.slots[handle].measured
    }

    /// The bit observed by the most recent `measure` on this handle, if
    /// any; consulted when a `@tracked` field is aggregated at
    /// destructor time.
    pub fn outcome(&self, handle: usize) -> Option<u8> {
        self.slots[handle].outcome
    }

    pub fn h(&mut self, handle: usize) {
        self.sim.h(self.sim_index(handle));
    }

    pub fn x(&mut self, handle: usize) {
        self.sim.x(self.sim_index(handle));
    }

    pub fn y(&mut self, handle: usize) {
        self.sim.y(self.sim_index(handle));
    }

    pub fn z(&mut self, handle: usize) {
        self.sim.z(self.sim_index(handle));
    }

    pub fn rx(&mut self, handle: usize, theta: f64) {
        self.sim.rx(self.sim_index(handle), theta);
    }

    pub fn ry(&mut self, handle: usize, theta: f64) {
        self.sim.ry(self.sim_index(handle), theta);
    }

    pub fn rz(&mut self, handle: usize, theta: f64) {
        self.sim.rz(self.sim_index(handle), theta);
    }

    pub fn cx(&mut self, control: usize, target: usize) {
        self.sim.cx(self.sim_index(control), self.sim_index(target));
    }

    pub fn measure(&mut self, handle: usize) -> u8 {
        let outcome = self.sim.measure(self.sim_index(handle));
        self.slots[handle].measured = true;
        self.slots[handle].outcome = Some(outcome);
        outcome
    }

    /// Explicit `reset` statement: clears measured status without
    /// releasing the handle.
    pub fn reset(&mut self, handle: usize) {
        self.sim.reset(self.sim_index(handle));
        self.slots[handle].measured = false;
        self.slots[handle].outcome = None;
    }

    /// Returns a handle to the free list on `destroy` or scope exit.
    /// The simulator slot itself is left alone until the handle is
    /// reused, at which point `allocate` resets it.
    pub fn release(&mut self, handle: usize) {
        if self.slots[handle].alive {
            self.slots[handle].alive = false;
            self.free_list.push(handle);
        }
    }

    pub fn get_qasm(&self) -> String {
        self.sim.get_qasm()
    }
}

impl Default for QubitTable {
    fn default() -> Self {
        Self::new()
    }
}
