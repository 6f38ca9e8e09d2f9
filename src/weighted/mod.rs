//! # `weighted` – The Neural Extension
//!
//! A [`WeightedExpression`] wraps an [`Expression`] whose kernel set is
//! restricted to the differentiable activations `{tanh, sig, ReLu, ELU,
//! ISRU}` and adds a weight per incoming edge plus a bias per node. Forward
//! evaluation folds the arity-many source values into a single
//! pre-activation scalar before handing it to the (always-unary) activation
//! kernel; [`WeightedExpression::d_loss`] walks the same active set backward
//! to get exact gradients with respect to every weight and bias, independent
//! of the Taylor-arithmetic path `problem` uses for constants.
use crate::element::Element;
use crate::error::DcgpError;
use crate::expression::Expression;
use crate::kernel::{Kernel, KernelName, KernelSet};
use crate::random::RandomGenerator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossKind {
    Mse,
    Ce,
}

#[derive(Debug, Clone)]
pub struct WeightedExpression {
    expression: Expression,
    weights: Vec<f64>,
    biases: Vec<f64>,
    weight_column_offset: Vec<usize>,
}

fn local_derivative(name: KernelName, z: f64, value: f64) -> f64 {
    match name {
        KernelName::Tanh => 1.0 - value * value,
        KernelName::Sig => value * (1.0 - value),
        KernelName::ReLu => if z > 0.0 { 1.0 } else { 0.0 },
        KernelName::ELU => if z > 0.0 { 1.0 } else { value + 1.0 },
        KernelName::ISRU => {
            if z == 0.0 { 1.0 } else { (value * value * value) / (z * z * z) }
        }
        _ => unreachable!("WeightedExpression restricts kernels to differentiable activations"),
    }
}

impl WeightedExpression {
    pub fn new(
        n: usize,
        m: usize,
        r: usize,
        c: usize,
        l: usize,
        arity: crate::expression::Arity,
        kernels: KernelSet,
        seed: Option<u64>,
    ) -> Result<Self, DcgpError> {
        kernels.validate_differentiable()?;
        let expression = Expression::new(n, m, r, c, l, arity, kernels, seed)?;
        Ok(Self::from_expression(expression))
    }

    fn from_expression(expression: Expression) -> Self {
        let r = expression.r();
        let arity = expression.arity();
        let mut weight_column_offset = Vec::with_capacity(arity.len() + 1);
        let mut offset = 0usize;
        for &a in arity {
            weight_column_offset.push(offset);
            offset += r * a;
        }
        weight_column_offset.push(offset);
        let n_weights = offset;
        let n_biases = expression.n_internal_nodes();
        WeightedExpression {
            expression,
            weights: vec![1.0; n_weights],
            biases: vec![0.0; n_biases],
            weight_column_offset,
        }
    }

    pub fn expression(&self) -> &Expression {
        &self.expression
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn biases(&self) -> &[f64] {
        &self.biases
    }

    pub fn set_weight(&mut self, index: usize, value: f64) -> Result<(), DcgpError> {
        if index >= self.weights.len() {
            return Err(DcgpError::invalid("weight index", format!("< {}", self.weights.len()), index.to_string()));
        }
        self.weights[index] = value;
        Ok(())
    }

    pub fn set_weights(&mut self, weights: Vec<f64>) -> Result<(), DcgpError> {
        if weights.len() != self.weights.len() {
            return Err(DcgpError::invalid("weights length", self.weights.len().to_string(), weights.len().to_string()));
        }
        self.weights = weights;
        Ok(())
    }

    pub fn set_bias(&mut self, index: usize, value: f64) -> Result<(), DcgpError> {
        if index >= self.biases.len() {
            return Err(DcgpError::invalid("bias index", format!("< {}", self.biases.len()), index.to_string()));
        }
        self.biases[index] = value;
        Ok(())
    }

    pub fn set_biases(&mut self, biases: Vec<f64>) -> Result<(), DcgpError> {
        if biases.len() != self.biases.len() {
            return Err(DcgpError::invalid("biases length", self.biases.len().to_string(), biases.len().to_string()));
        }
        self.biases = biases;
        Ok(())
    }

    pub fn set_output_f(&mut self, kernel_id: usize) -> Result<(), DcgpError> {
        self.expression.set_output_f(kernel_id)
    }

    fn node_column_row(&self, node: usize) -> (usize, usize) {
        let n = self.expression.n();
        let r = self.expression.r();
        ((node - n) / r, (node - n) % r)
    }

    fn weight_start(&self, node: usize) -> usize {
        let (j, row) = self.node_column_row(node);
        self.weight_column_offset[j] + row * self.expression.arity()[j]
    }

    fn bias_index(&self, node: usize) -> usize {
        node - self.expression.n()
    }

    fn node_connections(&self, node: usize) -> Vec<usize> {
        let chromosome = self.expression.chromosome();
        let (j, row) = self.node_column_row(node);
        let block = self.expression.arity()[j] + 1;
        let column_gene_offset = {
            let mut offset = 0usize;
            for &a in &self.expression.arity()[..j] {
                offset += self.expression.r() * (a + 1);
            }
            offset
        };
        let start = column_gene_offset + row * block + 1;
        chromosome[start..start + self.expression.arity()[j]].to_vec()
    }

    fn node_function(&self, node: usize) -> usize {
        let chromosome = self.expression.chromosome();
        let (j, row) = self.node_column_row(node);
        let block = self.expression.arity()[j] + 1;
        let column_gene_offset = {
            let mut offset = 0usize;
            for &a in &self.expression.arity()[..j] {
                offset += self.expression.r() * (a + 1);
            }
            offset
        };
        chromosome[column_gene_offset + row * block]
    }

    fn kernel_at(&self, node: usize) -> &Kernel {
        self.expression.kernels().get(self.node_function(node)).expect("function gene within bounds")
    }

    /// Forward pass generic over any [`Element`]. `weights`/`biases` are
    /// lifted via `E::from_f64` before the affine pre-combination.
    pub fn call<E: Element>(&self, point: &[E]) -> Result<Vec<E>, DcgpError> {
        if point.len() != self.expression.n() {
            return Err(DcgpError::invalid(
                "point length",
                self.expression.n().to_string(),
                point.len().to_string(),
            ));
        }
        let total = self.expression.n() + self.expression.n_internal_nodes();
        let mut values: Vec<Option<E>> = vec![None; total];
        for (i, v) in point.iter().enumerate() {
            values[i] = Some(v.clone());
        }
        for &node in self.expression.active_nodes() {
            if node < self.expression.n() {
                continue;
            }
            let conns = self.node_connections(node);
            let w_start = self.weight_start(node);
            let bias = E::from_f64(self.biases[self.bias_index(node)]);
            let mut z = bias;
            for (k, &src) in conns.iter().enumerate() {
                let w = E::from_f64(self.weights[w_start + k]);
                let v = values[src].clone().expect("source computed before consumer");
                z = z.add(&w.mul(&v));
            }
            let kernel = self.kernel_at(node);
            values[node] = Some(kernel.call(&[z]));
        }
        let out_start = self.expression.output_genes_start();
        Ok(self.expression.chromosome()[out_start..]
            .iter()
            .map(|&src| values[src].clone().expect("output source computed"))
            .collect())
    }

    /// Forward pass over `f64` retaining, per active internal node, the
    /// pre-activation `z`, the post-activation value, and the local
    /// derivative (`d value / d z`) — everything `d_loss`'s backward sweep needs.
    fn forward_f64(&self, point: &[f64]) -> Result<(Vec<f64>, Vec<f64>), DcgpError> {
        if point.len() != self.expression.n() {
            return Err(DcgpError::invalid(
                "point length",
                self.expression.n().to_string(),
                point.len().to_string(),
            ));
        }
        let total = self.expression.n() + self.expression.n_internal_nodes();
        let mut values = vec![0.0f64; total];
        let mut dnode = vec![0.0f64; total];
        values[..point.len()].copy_from_slice(point);
        for &node in self.expression.active_nodes() {
            if node < self.expression.n() {
                continue;
            }
            let conns = self.node_connections(node);
            let w_start = self.weight_start(node);
            let mut z = self.biases[self.bias_index(node)];
            for (k, &src) in conns.iter().enumerate() {
                z += self.weights[w_start + k] * values[src];
            }
            let kernel_name = self.expression.kernels().get(self.node_function(node)).unwrap().name;
            let value = self.kernel_at(node).call(&[z]);
            dnode[node] = local_derivative(kernel_name, z, value);
            values[node] = value;
        }
        Ok((values, dnode))
    }

    fn output_sources(&self) -> Vec<usize> {
        let out_start = self.expression.output_genes_start();
        self.expression.chromosome()[out_start..].to_vec()
    }

    /// Per-sample loss and gradient with respect to every weight and bias,
    /// following the reverse-mode sweep described for `WeightedExpression`.
    pub fn d_loss(&self, point: &[f64], label: &[f64], kind: LossKind) -> Result<(f64, Vec<f64>, Vec<f64>), DcgpError> {
        let out_sources = self.output_sources();
        if label.len() != out_sources.len() {
            return Err(DcgpError::invalid("label length", out_sources.len().to_string(), label.len().to_string()));
        }
        let (values, local_deriv) = self.forward_f64(point)?;

        let output_values: Vec<f64> = out_sources.iter().map(|&s| values[s]).collect();
        let (loss, seeds) = match kind {
            LossKind::Mse => {
                let loss: f64 = output_values.iter().zip(label).map(|(a, y)| (a - y) * (a - y)).sum();
                let seeds: Vec<f64> = output_values.iter().zip(label).map(|(a, y)| 2.0 * (a - y)).collect();
                (loss, seeds)
            }
            LossKind::Ce => {
                let max = output_values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                let exps: Vec<f64> = output_values.iter().map(|&a| (a - max).exp()).collect();
                let sum_exp: f64 = exps.iter().sum();
                let p: Vec<f64> = exps.iter().map(|&e| e / sum_exp).collect();
                let loss = -p.iter().zip(label).map(|(pi, yi)| yi * pi.max(1e-300).ln()).sum::<f64>();
                let seeds: Vec<f64> = p.iter().zip(label).map(|(pi, yi)| pi - yi).collect();
                (loss, seeds)
            }
        };

        let total = values.len();
        let mut accumulator = vec![0.0f64; total];
        for (&src, &seed) in out_sources.iter().zip(&seeds) {
            accumulator[src] += seed;
        }

        let mut grad_w = vec![0.0f64; self.weights.len()];
        let mut grad_b = vec![0.0f64; self.biases.len()];
        let mut dnode = vec![0.0f64; total];

        for &node in self.expression.active_nodes().iter().rev() {
            if node < self.expression.n() {
                continue;
            }
            let d = local_deriv[node] * accumulator[node];
            dnode[node] = d;
            let conns = self.node_connections(node);
            let w_start = self.weight_start(node);
            for (k, &src) in conns.iter().enumerate() {
                grad_w[w_start + k] += d * values[src];
                accumulator[src] += self.weights[w_start + k] * d;
            }
            grad_b[self.bias_index(node)] += d;
        }

        Ok((loss, grad_w, grad_b))
    }

    /// Batched, averaged form of [`WeightedExpression::d_loss`].
    pub fn d_loss_batch(&self, points: &[Vec<f64>], labels: &[Vec<f64>], kind: LossKind) -> Result<(f64, Vec<f64>, Vec<f64>), DcgpError> {
        if points.len() != labels.len() {
            return Err(DcgpError::invalid("points/labels length", points.len().to_string(), labels.len().to_string()));
        }
        if points.is_empty() {
            return Err(DcgpError::invalid("points", "a non-empty batch", "empty"));
        }
        let n = points.len() as f64;
        let mut total_loss = 0.0;
        let mut total_gw = vec![0.0f64; self.weights.len()];
        let mut total_gb = vec![0.0f64; self.biases.len()];
        for (point, label) in points.iter().zip(labels) {
            let (loss, gw, gb) = self.d_loss(point, label, kind)?;
            total_loss += loss;
            for (acc, v) in total_gw.iter_mut().zip(&gw) {
                *acc += v;
            }
            for (acc, v) in total_gb.iter_mut().zip(&gb) {
                *acc += v;
            }
        }
        for v in &mut total_gw {
            *v /= n;
        }
        for v in &mut total_gb {
            *v /= n;
        }
        Ok((total_loss / n, total_gw, total_gb))
    }

    /// Batched, averaged loss without gradients.
    pub fn loss_batch(&self, points: &[Vec<f64>], labels: &[Vec<f64>], kind: LossKind) -> Result<f64, DcgpError> {
        self.d_loss_batch(points, labels, kind).map(|(loss, _, _)| loss)
    }

    /// One epoch of mini-batch SGD over contiguous batches (a trailing short
    /// batch is allowed). `batch_size == 0` fails like any other malformed size.
    pub fn sgd(
        &mut self,
        points: &[Vec<f64>],
        labels: &[Vec<f64>],
        lr: f64,
        batch_size: usize,
        kind: LossKind,
    ) -> Result<(), DcgpError> {
        if points.len() != labels.len() {
            return Err(DcgpError::invalid("points/labels length", points.len().to_string(), labels.len().to_string()));
        }
        if points.is_empty() {
            return Err(DcgpError::invalid("points", "a non-empty dataset", "empty"));
        }
        if lr <= 0.0 {
            return Err(DcgpError::invalid("lr", "> 0", lr.to_string()));
        }
        if batch_size == 0 {
            return Err(DcgpError::invalid("batch_size", ">= 1", "0"));
        }
        for chunk_points in points.chunks(batch_size).zip(labels.chunks(batch_size)) {
            let (batch_points, batch_labels) = chunk_points;
            let (_loss, gw, gb) = self.d_loss_batch(batch_points, batch_labels, kind)?;
            for (w, g) in self.weights.iter_mut().zip(&gw) {
                *w -= lr * g;
            }
            for (b, g) in self.biases.iter_mut().zip(&gb) {
                *b -= lr * g;
            }
        }
        Ok(())
    }

    /// Random construction matching `Expression::new`'s seeding convention,
    /// with `weights`/`biases` left at their 1-/0-initialized defaults.
    pub fn mutate_gene(&mut self, i: usize, rng: &mut impl RandomGenerator) -> Result<(), DcgpError> {
        self.expression.mutate_gene(i, rng)
    }

    pub fn mutate_active(&mut self, k: usize, rng: &mut impl RandomGenerator) -> Result<(), DcgpError> {
        self.expression.mutate_active(k, rng)
    }

    /// Symbolic form of the network, one string per output. Each node folds
    /// its incoming edges into the affine pre-combination `b_i + w_i_0*arg_0
    /// + w_i_1*arg_1 + …` under a stable `w{node}_{k}`/`b{node}` naming
    /// scheme, then hands that string to the node's activation kernel's
    /// printer.
    pub fn pretty(&self) -> Result<Vec<String>, DcgpError> {
        let n = self.expression.n();
        let total = n + self.expression.n_internal_nodes();
        let mut values: Vec<Option<String>> = vec![None; total];
        for i in 0..n {
            values[i] = Some(format!("x{i}"));
        }
        for &node in self.expression.active_nodes() {
            if node < n {
                continue;
            }
            let conns = self.node_connections(node);
            let bias = format!("b{node}");
            let mut terms = vec![bias];
            for (k, &src) in conns.iter().enumerate() {
                let arg = values[src].clone().expect("source node computed before consumer");
                terms.push(format!("w{node}_{k}*{arg}"));
            }
            let z = format!("({})", terms.join(" + "));
            let kernel = self.kernel_at(node);
            values[node] = Some(kernel.print(&[z]));
        }
        let out_start = self.expression.output_genes_start();
        Ok(self.expression.chromosome()[out_start..]
            .iter()
            .map(|&src| values[src].clone().expect("output source node computed"))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::Arity;
    use crate::random::DcgpRandomGenerator;

    fn tanh_kernels() -> KernelSet {
        KernelSet::from_names(&["tanh"]).unwrap()
    }

    fn relu_kernels() -> KernelSet {
        KernelSet::from_names(&["ReLu"]).unwrap()
    }

    #[test]
    fn construction_rejects_non_differentiable_kernels() {
        let kernels = KernelSet::from_names(&["sum"]).unwrap();
        assert!(WeightedExpression::new(1, 1, 1, 1, 1, Arity::Scalar(1), kernels, None).is_err());
    }

    /// `(n=1, m=1, r=1, c=2, L=1, arity=1, kernels=[tanh])`, `weights=[0.1,
    /// 0.2]`, `biases=[0.3, 0.4]`: `call([0.23])[0]` matches the nested
    /// closed form to within `1e-13`.
    #[test]
    fn ann_forward_is_bit_exact() {
        let mut we = WeightedExpression::new(1, 1, 1, 2, 1, Arity::Scalar(1), tanh_kernels(), Some(0)).unwrap();
        we.set_weights(vec![0.1, 0.2]).unwrap();
        we.set_biases(vec![0.3, 0.4]).unwrap();
        // Force the 2-node chain: node1 = tanh(w0*x0 + b0), node2 = tanh(w1*node1 + b1), output = node2.
        let chromosome = vec![0, 0, 0, 1, 2];
        we.expression.set(chromosome).unwrap();
        let out = we.call(&[0.23]).unwrap();
        let expected = (0.4 + 0.2 * (0.23_f64 * 0.1 + 0.3).tanh()).tanh();
        assert!((out[0] - expected).abs() < 1e-13);
    }

    #[test]
    fn gradient_matches_central_differences() {
        let mut rng = DcgpRandomGenerator::new_from_seed(Some(3));
        let mut we = WeightedExpression::new(1, 1, 100, 3, 10, Arity::Scalar(1), relu_kernels(), Some(4)).unwrap();
        let weights: Vec<f64> = (0..we.weights().len()).map(|_| rng.gen_range_f64(-1.0, 1.0)).collect();
        let biases: Vec<f64> = (0..we.biases().len()).map(|_| rng.gen_range_f64(-1.0, 1.0)).collect();
        we.set_weights(weights).unwrap();
        we.set_biases(biases).unwrap();

        let point = vec![0.22];
        let label = vec![0.23];
        let (_, grad_w, grad_b) = we.d_loss(&point, &label, LossKind::Mse).unwrap();

        let h = 1e-8;
        let loss_at = |we: &WeightedExpression| -> f64 {
            let out = we.call(&point).unwrap();
            (out[0] - label[0]) * (out[0] - label[0])
        };
        let mut checked_any_nonzero = false;
        for i in 0..we.weights().len() {
            if grad_w[i] == 0.0 {
                continue;
            }
            checked_any_nonzero = true;
            let mut plus = we.clone();
            let w = plus.weights[i];
            plus.weights[i] = w + h;
            let lp = loss_at(&plus);
            let mut minus = we.clone();
            minus.weights[i] = w - h;
            let lm = loss_at(&minus);
            let numeric = (lp - lm) / (2.0 * h);
            let rel_err = (numeric - grad_w[i]).abs() / numeric.abs().max(1e-8);
            assert!(rel_err < 0.2, "weight {i}: analytic {} vs numeric {numeric}", grad_w[i]);
        }
        assert!(checked_any_nonzero);
        let _ = grad_b;
    }

    /// Same 2-node chain as `ann_forward_is_bit_exact`: `pretty()` names the
    /// pre-activation of each node with that node's own weight/bias symbols
    /// and wraps it in `tanh(...)`.
    #[test]
    fn pretty_names_weights_and_biases_per_node() {
        let mut we = WeightedExpression::new(1, 1, 1, 2, 1, Arity::Scalar(1), tanh_kernels(), Some(0)).unwrap();
        we.set_weights(vec![0.1, 0.2]).unwrap();
        we.set_biases(vec![0.3, 0.4]).unwrap();
        let chromosome = vec![0, 0, 0, 1, 2];
        we.expression.set(chromosome).unwrap();
        let printed = we.pretty().unwrap();
        assert_eq!(printed.len(), 1);
        assert_eq!(printed[0], "tanh((b2 + w2_0*tanh((b1 + w1_0*x0))))");
    }

    #[test]
    fn sgd_rejects_malformed_input() {
        let mut we = WeightedExpression::new(1, 1, 1, 1, 1, Arity::Scalar(1), tanh_kernels(), Some(0)).unwrap();
        assert!(we.sgd(&[], &[], 0.1, 1, LossKind::Mse).is_err());
        assert!(we.sgd(&[vec![0.1]], &[vec![0.1], vec![0.2]], 0.1, 1, LossKind::Mse).is_err());
        assert!(we.sgd(&[vec![0.1]], &[vec![0.1]], 0.0, 1, LossKind::Mse).is_err());
        assert!(we.sgd(&[vec![0.1]], &[vec![0.1]], 0.1, 0, LossKind::Mse).is_err());
    }

    #[test]
    fn sgd_one_epoch_reduces_loss_on_average() {
        let mut we = WeightedExpression::new(1, 1, 1, 3, 1, Arity::Scalar(1), tanh_kernels(), Some(1)).unwrap();
        let points: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64 / 20.0]).collect();
        let labels: Vec<Vec<f64>> = points.iter().map(|p| vec![(p[0] * 2.0).tanh()]).collect();
        let before = we.loss_batch(&points, &labels, LossKind::Mse).unwrap();
        for _ in 0..25 {
            we.sgd(&points, &labels, 0.05, 4, LossKind::Mse).unwrap();
        }
        let after = we.loss_batch(&points, &labels, LossKind::Mse).unwrap();
        assert!(after <= before);
    }
}
