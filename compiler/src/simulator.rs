//! Pure statevector simulation backing the runtime's quantum primitives.
//! The amplitude vector and recorded operation log are the only state;
//! everything else (qubit liveness, measurement bookkeeping) lives in
//! the evaluator, which is the simulator's sole caller.

use num_complex::Complex64;
use rand::Rng;

const ZERO: Complex64 = Complex64::new(0.0, 0.0);

#[derive(Debug, Clone)]
enum Op {
    H(usize),
    X(usize),
    Y(usize),
    Z(usize),
    Rx(usize, f64),
    Ry(usize, f64),
    Rz(usize, f64),
    Cx(usize, usize),
    Reset(usize),
    Measure(usize),
}

impl Op {
    fn to_qasm_line(&self) -> String {
        match self {
            Op::H(q) => format!("h q[{}];", q),
            Op::X(q) => format!("x q[{}];", q),
            Op::Y(q) => format!("y q[{}];", q),
            Op::Z(q) => format!("z q[{}];", q),
            Op::Rx(q, theta) => format!("rx({:.6}) q[{}];", theta, q),
            Op::Ry(q, theta) => format!("ry({:.6}) q[{}];", theta, q),
            Op::Rz(q, theta) => format!("rz({:.6}) q[{}];", theta, q),
            Op::Cx(c, t) => format!("cx q[{}],q[{}];", c, t),
            Op::Reset(q) => format!("reset q[{}];", q),
            Op::Measure(q) => format!("measure q[{}] -> c[{}];", q, q),
        }
    }
}

/// A 2x2 unitary over the amplitude pair spanning a single qubit's basis
/// states, applied in place across every `(i0, i1)` pair differing only
/// at bit `q`.
type Unitary = [[Complex64; 2]; 2];

pub struct QasmSimulator {
    amplitudes: Vec<Complex64>,
    num_qubits: usize,
    ops: Vec<Op>,
}

impl Default for QasmSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl QasmSimulator {
    pub fn new() -> Self {
        Self {
            amplitudes: vec![Complex64::new(1.0, 0.0)],
            num_qubits: 0,
            ops: Vec::new(),
        }
    }

    pub fn num_qubits(&self) -> usize {
        self.num_qubits
    }

    /// Doubles the statevector: the new qubit's `|0>` subspace inherits
    /// the current amplitudes, its `|1>` subspace starts at zero.
    pub fn allocate_qubit(&mut self) -> usize {
        let old_len = self.amplitudes.len();
        let mut grown = vec![ZERO; old_len * 2];
        grown[..old_len].copy_from_slice(&self.amplitudes);
        self.amplitudes = grown;
        let index = self.num_qubits;
        self.num_qubits += 1;
        index
    }

    fn apply_unitary(&mut self, q: usize, u: Unitary) {
        let mask = 1usize << q;
        let stride = mask << 1;
        let n = self.amplitudes.len();
        let mut base = 0;
        while base < n {
            for i0 in base..base + mask {
                let i1 = i0 | mask;
                let a0 = self.amplitudes[i0];
                let a1 = self.amplitudes[i1];
                self.amplitudes[i0] = u[0][0] * a0 + u[0][1] * a1;
                self.amplitudes[i1] = u[1][0] * a0 + u[1][1] * a1;
            }
            base += stride;
        }
    }

    pub fn h(&mut self, q: usize) {
        let s = std::f64::consts::FRAC_1_SQRT_2;
        let s = Complex64::new(s, 0.0);
        self.apply_unitary(q, [[s, s], [s, -s]]);
        self.ops.push(Op::H(q));
    }

    pub fn x(&mut self, q: usize) {
        let one = Complex64::new(1.0, 0.0);
        self.apply_unitary(q, [[ZERO, one], [one, ZERO]]);
        self.ops.push(Op::X(q));
    }

    pub fn y(&mut self, q: usize) {
        let i = Complex64::new(0.0, 1.0);
        self.apply_unitary(q, [[ZERO, -i], [i, ZERO]]);
        self.ops.push(Op::Y(q));
    }

    pub fn z(&mut self, q: usize) {
        let one = Complex64::new(1.0, 0.0);
        self.apply_unitary(q, [[one, ZERO], [ZERO, -one]]);
        self.ops.push(Op::Z(q));
    }

    pub fn rx(&mut self, q: usize, theta: f64) {
        let c = Complex64::new((theta / 2.0).cos(), 0.0);
        let s = Complex64::new(0.0, -(theta / 2.0).sin());
        self.apply_unitary(q, [[c, s], [s, c]]);
        self.ops.push(Op::Rx(q, theta));
    }

    pub fn ry(&mut self, q: usize, theta: f64) {
        let c = Complex64::new((theta / 2.0).cos(), 0.0);
        let s = Complex64::new((theta / 2.0).sin(), 0.0);
        self.apply_unitary(q, [[c, -s], [s, c]]);
        self.ops.push(Op::Ry(q, theta));
    }

    pub fn rz(&mut self, q: usize, theta: f64) {
        let half = theta / 2.0;
        let neg = Complex64::new(half.cos(), -half.sin());
        let pos = Complex64::new(half.cos(), half.sin());
        self.apply_unitary(q, [[neg, ZERO], [ZERO, pos]]);
        self.ops.push(Op::Rz(q, theta));
    }

    /// Swaps amplitudes of `|...1...0...> <-> |...1...1...>` on the
    /// `control = 1` subspace, flipping bit `target`.
    pub fn cx(&mut self, control: usize, target: usize) {
        let cmask = 1usize << control;
        let tmask = 1usize << target;
        let n = self.amplitudes.len();
        for i in 0..n {
            if i & cmask != 0 && i & tmask == 0 {
                let j = i | tmask;
                self.amplitudes.swap(i, j);
            }
        }
        self.ops.push(Op::Cx(control, target));
    }

    fn renormalize(&mut self) {
        let norm: f64 = self.amplitudes.iter().map(Complex64::norm_sqr).sum();
        if norm > 0.0 {
            let factor = norm.sqrt();
            for a in self.amplitudes.iter_mut() {
                *a /= factor;
            }
        }
    }

    /// Projects to the `|0>` subspace. If that subspace is empty, first
    /// swaps the `|1>` amplitudes into it (equivalent to an implicit X
    /// on a deterministic `|1>` state) so renormalisation never divides
    /// by zero.
    pub fn reset(&mut self, q: usize) {
        let mask = 1usize << q;
        let n = self.amplitudes.len();
        let norm0: f64 = (0..n)
            .filter(|i| i & mask == 0)
            .map(|i| self.amplitudes[i].norm_sqr())
            .sum();

        if norm0 == 0.0 {
            for i in 0..n {
                if i & mask == 0 {
                    let j = i | mask;
                    self.amplitudes[i] = self.amplitudes[j];
                    self.amplitudes[j] = ZERO;
                }
            }
        } else {
            for i in 0..n {
                if i & mask != 0 {
                    self.amplitudes[i] = ZERO;
                }
            }
        }
        self.renormalize();
        self.ops.push(Op::Reset(q));
    }

    /// Samples the outcome of measuring `q`, collapsing the statevector
    /// to the observed subspace and renormalising. Returns `0` or `1`.
    pub fn measure(&mut self, q: usize) -> u8 {
        let mask = 1usize << q;
        let n = self.amplitudes.len();
        let p1: f64 = (0..n)
            .filter(|i| i & mask != 0)
            .map(|i| self.amplitudes[i].norm_sqr())
            .sum();

        let u: f64 = rand::thread_rng().gen();
        let outcome: u8 = if u < p1 { 1 } else { 0 };

        for i in 0..n {
            let bit_set = i & mask != 0;
            if (outcome == 1) != bit_set {
                self.amplitudes[i] = ZERO;
            }
        }
        self.renormalize();
        self.ops.push(Op::Measure(q));
        outcome
    }

    /// Emits the fixed three-line header followed by one line per
    /// recorded operation, in the order applied.
    pub fn get_qasm(&self) -> String {
        let mut out = String::new();
        out.push_str("OPENQASM 2.0;\n");
        out.push_str("include \"qelib1.inc\";\n");
        out.push_str(&format!(
            "qreg q[{}]; creg c[{}];\n",
            self.num_qubits, self.num_qubits
        ));
        for op in &self.ops {
            out.push_str(&op.to_qasm_line());
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prob_one(sim: &QasmSimulator, q: usize) -> f64 {
        let mask = 1usize << q;
        sim.amplitudes
            .iter()
            .enumerate()
            .filter(|(i, _)| i & mask != 0)
            .map(|(_, a)| a.norm_sqr())
            .sum()
    }

    #[test]
    fn hadamard_gives_even_split() {
        let mut sim = QasmSimulator::new();
        let q = sim.allocate_qubit();
        sim.h(q);
        assert!((prob_one(&sim, q) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn x_flips_deterministically() {
        let mut sim = QasmSimulator::new();
        let q = sim.allocate_qubit();
        sim.x(q);
        assert!((prob_one(&sim, q) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cx_entangles_bell_pair() {
        let mut sim = QasmSimulator::new();
        let c = sim.allocate_qubit();
        let t = sim.allocate_qubit();
        sim.h(c);
        sim.cx(c, t);
        let total: f64 = sim.amplitudes.iter().map(Complex64::norm_sqr).sum();
        assert!((total - 1.0).abs() < 1e-9);
        // the |01> and |10> amplitudes must be zero in a Bell pair
        assert!(sim.amplitudes[0b01].norm_sqr() < 1e-12);
        assert!(sim.amplitudes[0b10].norm_sqr() < 1e-12);
    }

    #[test]
    fn reset_on_deterministic_one_never_nans() {
        let mut sim = QasmSimulator::new();
        let q = sim.allocate_qubit();
        sim.x(q);
        sim.reset(q);
        assert!((prob_one(&sim, q) - 0.0).abs() < 1e-9);
        assert!(sim.amplitudes.iter().all(|a| !a.re.is_nan() && !a.im.is_nan()));
    }

    #[test]
    fn qasm_header_has_three_lines_before_ops() {
        let mut sim = QasmSimulator::new();
        let q = sim.allocate_qubit();
        sim.h(q);
        let qasm = sim.get_qasm();
        let lines: Vec<&str> = qasm.lines().collect();
        assert_eq!(lines[0], "OPENQASM 2.0;");
        assert_eq!(lines[1], "include \"qelib1.inc\";");
        assert_eq!(lines[2], "qreg q[1]; creg c[1];");
        assert_eq!(lines[3], "h q[0];");
        assert!(qasm.ends_with('\n'));
    }
}
