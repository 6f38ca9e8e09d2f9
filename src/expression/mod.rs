//! # `expression` – The Grid-Encoded DAG
//!
//! An [`Expression`] is a directed acyclic graph laid out on a fixed grid of
//! `r` rows by `c` columns of internal nodes, fed by `n` inputs and exposing
//! `m` outputs. Its chromosome is a flat `Vec<usize>`: for each internal node,
//! one function gene followed by `arity` connection genes, then `m` trailing
//! output genes. Node values live in a dense array indexed by node id during
//! evaluation — never in heap-linked node objects (spec design note:
//! "Ownership of the graph") — so the inner loop never chases pointers.
use crate::element::Element;
use crate::error::DcgpError;
use crate::kernel::KernelSet;
use crate::random::RandomGenerator;

/// Per-column arity: either one value shared by every column, or one value
/// per column. Normalized to a `Vec<usize>` of length `c` at construction —
/// see spec.md §9's open question about the scalar-arity constructor path.
#[derive(Debug, Clone)]
pub enum Arity {
    Scalar(usize),
    PerColumn(Vec<usize>),
}

impl Arity {
    fn normalize(self, c: usize) -> Result<Vec<usize>, DcgpError> {
        let arities = match self {
            Arity::Scalar(a) => vec![a; c],
            Arity::PerColumn(v) => v,
        };
        if arities.len() != c {
            return Err(DcgpError::invalid("arity vector length", c.to_string(), arities.len().to_string()));
        }
        if arities.iter().any(|&a| a < 1) {
            return Err(DcgpError::invalid("every column arity", ">= 1", format!("{arities:?}")));
        }
        Ok(arities)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GeneKind {
    Function,
    Connection,
    Output,
}

#[derive(Debug, Clone)]
pub struct Expression {
    n: usize,
    m: usize,
    r: usize,
    c: usize,
    l: usize,
    arity: Vec<usize>,
    kernels: KernelSet,
    chromosome: Vec<usize>,
    /// Prefix sum of gene-block widths per column, used to locate a node's genes.
    column_gene_offset: Vec<usize>,
    active_nodes: Vec<usize>,
}

impl Expression {
    pub fn new(
        n: usize,
        m: usize,
        r: usize,
        c: usize,
        l: usize,
        arity: Arity,
        kernels: KernelSet,
        seed: Option<u64>,
    ) -> Result<Self, DcgpError> {
        if n == 0 {
            return Err(DcgpError::invalid("n (number of inputs)", ">= 1", "0"));
        }
        if m == 0 {
            return Err(DcgpError::invalid("m (number of outputs)", ">= 1", "0"));
        }
        if r == 0 {
            return Err(DcgpError::invalid("r (rows)", ">= 1", "0"));
        }
        if c == 0 {
            return Err(DcgpError::invalid("c (columns)", ">= 1", "0"));
        }
        if l == 0 {
            return Err(DcgpError::invalid("L (levels-back)", ">= 1", "0"));
        }
        if kernels.is_empty() {
            return Err(DcgpError::invalid("kernels", "a non-empty kernel set", "empty"));
        }
        let arity = arity.normalize(c)?;

        let mut column_gene_offset = Vec::with_capacity(c + 1);
        let mut offset = 0usize;
        for &a in &arity {
            column_gene_offset.push(offset);
            offset += r * (a + 1);
        }
        column_gene_offset.push(offset);
        let output_genes_start = offset;
        let chromosome_len = output_genes_start + m;

        let mut rng = crate::random::DcgpRandomGenerator::new_from_seed(seed);
        let mut expr = Expression {
            n,
            m,
            r,
            c,
            l,
            arity,
            kernels,
            chromosome: vec![0; chromosome_len],
            column_gene_offset,
            active_nodes: Vec::new(),
        };
        for i in 0..chromosome_len {
            let (lo, hi) = expr.gene_bounds(i);
            expr.chromosome[i] = rng.gen_range_usize(lo, hi + 1);
        }
        expr.refresh_active_nodes();
        Ok(expr)
    }

    pub fn n(&self) -> usize {
        self.n
    }
    pub fn m(&self) -> usize {
        self.m
    }
    pub fn r(&self) -> usize {
        self.r
    }
    pub fn c(&self) -> usize {
        self.c
    }
    pub fn l(&self) -> usize {
        self.l
    }
    pub fn arity(&self) -> &[usize] {
        &self.arity
    }
    pub fn kernels(&self) -> &KernelSet {
        &self.kernels
    }
    pub fn chromosome(&self) -> &[usize] {
        &self.chromosome
    }
    pub fn chromosome_len(&self) -> usize {
        self.chromosome.len()
    }
    pub fn n_internal_nodes(&self) -> usize {
        self.r * self.c
    }
    pub fn output_genes_start(&self) -> usize {
        self.column_gene_offset[self.c]
    }

    fn node_id_column(&self, node_id: usize) -> usize {
        debug_assert!(node_id >= self.n);
        (node_id - self.n) / self.r
    }

    fn node_id_row(&self, node_id: usize) -> usize {
        (node_id - self.n) % self.r
    }

    /// First chromosome index of `node_id`'s gene block (function gene, then connections).
    fn node_gene_start(&self, node_id: usize) -> usize {
        let j = self.node_id_column(node_id);
        let row = self.node_id_row(node_id);
        self.column_gene_offset[j] + row * (self.arity[j] + 1)
    }

    fn gene_kind(&self, gene_index: usize) -> GeneKind {
        if gene_index >= self.output_genes_start() {
            return GeneKind::Output;
        }
        // Binary search the column this gene falls in.
        let j = (0..self.c)
            .rev()
            .find(|&j| gene_index >= self.column_gene_offset[j])
            .unwrap();
        let within_column = gene_index - self.column_gene_offset[j];
        let block = self.arity[j] + 1;
        if within_column % block == 0 { GeneKind::Function } else { GeneKind::Connection }
    }

    /// The column of the node a connection/function gene belongs to (output genes have no column).
    fn gene_column(&self, gene_index: usize) -> usize {
        (0..self.c)
            .rev()
            .find(|&j| gene_index >= self.column_gene_offset[j])
            .unwrap()
    }

    fn connection_bounds_for_column(&self, j: usize) -> (usize, usize) {
        let lower = if (j as isize) - (self.l as isize) <= 0 {
            0
        } else {
            self.n + (j - self.l) * self.r
        };
        let upper = if j == 0 { self.n - 1 } else { self.n + (j - 1) * self.r + self.r - 1 };
        (lower, upper)
    }

    fn output_bounds(&self) -> (usize, usize) {
        let lower = if (self.c as isize) - (self.l as isize) <= 0 {
            0
        } else {
            self.n + (self.c - self.l) * self.r
        };
        let upper = self.n + self.r * self.c - 1;
        (lower, upper)
    }

    /// The `[lo, hi]` inclusive bound for chromosome position `gene_index`.
    fn gene_bounds(&self, gene_index: usize) -> (usize, usize) {
        match self.gene_kind(gene_index) {
            GeneKind::Function => (0, self.kernels.len() - 1),
            GeneKind::Connection => {
                let j = self.gene_column(gene_index);
                self.connection_bounds_for_column(j)
            }
            GeneKind::Output => self.output_bounds(),
        }
    }

    /// Validates `chromosome`'s length and per-gene bounds.
    pub fn is_valid(&self, chromosome: &[usize]) -> bool {
        if chromosome.len() != self.chromosome.len() {
            return false;
        }
        for (i, &gene) in chromosome.iter().enumerate() {
            let (lo, hi) = self.gene_bounds(i);
            if gene < lo || gene > hi {
                return false;
            }
        }
        true
    }

    /// Replaces the chromosome, failing closed if it is not valid.
    pub fn set(&mut self, chromosome: Vec<usize>) -> Result<(), DcgpError> {
        if !self.is_valid(&chromosome) {
            return Err(DcgpError::invalid(
                "chromosome",
                format!("length {} with every gene within its bound", self.chromosome.len()),
                format!("length {}", chromosome.len()),
            ));
        }
        self.chromosome = chromosome;
        self.refresh_active_nodes();
        Ok(())
    }

    fn node_connections(&self, node_id: usize) -> &[usize] {
        let j = self.node_id_column(node_id);
        let start = self.node_gene_start(node_id) + 1;
        &self.chromosome[start..start + self.arity[j]]
    }

    fn node_function(&self, node_id: usize) -> usize {
        self.chromosome[self.node_gene_start(node_id)]
    }

    /// Backward breadth-first expansion from the output selectors. Returns a
    /// deduplicated, ascending-sorted list of active node ids.
    fn compute_active_nodes(&self) -> Vec<usize> {
        let mut visited = vec![false; self.n + self.r * self.c];
        let mut frontier: Vec<usize> = self.chromosome[self.output_genes_start()..].to_vec();
        for &node in &frontier {
            visited[node] = true;
        }
        while !frontier.is_empty() {
            let mut next = Vec::new();
            for node in frontier {
                if node >= self.n {
                    for &src in self.node_connections(node) {
                        if !visited[src] {
                            visited[src] = true;
                            next.push(src);
                        }
                    }
                }
            }
            frontier = next;
        }
        let mut active: Vec<usize> = visited
            .iter()
            .enumerate()
            .filter_map(|(id, &v)| if v { Some(id) } else { None })
            .collect();
        active.sort_unstable();
        active
    }

    fn refresh_active_nodes(&mut self) {
        self.active_nodes = self.compute_active_nodes();
    }

    /// The current active node set: ids influencing at least one output,
    /// sorted ascending, deduplicated. Pure function of the chromosome.
    pub fn active_nodes(&self) -> &[usize] {
        &self.active_nodes
    }

    /// Chromosome positions (function + connection genes of active internal
    /// nodes, plus every output gene) that actually influence the output.
    pub fn active_genes(&self) -> Vec<usize> {
        let mut genes = Vec::new();
        for &node in &self.active_nodes {
            if node >= self.n {
                let j = self.node_id_column(node);
                let start = self.node_gene_start(node);
                for g in start..start + self.arity[j] + 1 {
                    genes.push(g);
                }
            }
        }
        for g in self.output_genes_start()..self.chromosome.len() {
            genes.push(g);
        }
        genes.sort_unstable();
        genes
    }

    /// Evaluates the expression at `point`, visiting only active nodes in
    /// ascending (topological) order.
    pub fn call<E: Element>(&self, point: &[E]) -> Result<Vec<E>, DcgpError> {
        if point.len() != self.n {
            return Err(DcgpError::invalid("point length", self.n.to_string(), point.len().to_string()));
        }
        let mut values: Vec<Option<E>> = vec![None; self.n + self.r * self.c];
        for (i, v) in point.iter().enumerate() {
            values[i] = Some(v.clone());
        }
        for &node in &self.active_nodes {
            if node < self.n {
                continue;
            }
            let j = self.node_id_column(node);
            let kernel_idx = self.node_function(node);
            let kernel = self.kernels.get(kernel_idx).expect("function gene within bounds");
            let args: Vec<E> = self.node_connections(node)[..self.arity[j]]
                .iter()
                .map(|&src| values[src].clone().expect("source node computed before consumer"))
                .collect();
            values[node] = Some(kernel.call(&args));
        }
        let out_start = self.output_genes_start();
        Ok(self.chromosome[out_start..]
            .iter()
            .map(|&src| values[src].clone().expect("output source node computed"))
            .collect())
    }

    /// Redraws gene `i` uniformly within its bound, excluding its current
    /// value. A no-op if the bound admits only one value.
    pub fn mutate_gene(&mut self, i: usize, rng: &mut impl RandomGenerator) -> Result<(), DcgpError> {
        if i >= self.chromosome.len() {
            return Err(DcgpError::invalid("gene index", format!("< {}", self.chromosome.len()), i.to_string()));
        }
        let (lo, hi) = self.gene_bounds(i);
        if let Some(new_value) = rng.gen_range_excluding(lo, hi + 1, self.chromosome[i]) {
            self.chromosome[i] = new_value;
            self.refresh_active_nodes();
        }
        Ok(())
    }

    /// Batched form of [`Expression::mutate_gene`]. No partial mutation is
    /// committed if any index is out of range.
    pub fn mutate_genes(&mut self, indices: &[usize], rng: &mut impl RandomGenerator) -> Result<(), DcgpError> {
        for &i in indices {
            if i >= self.chromosome.len() {
                return Err(DcgpError::invalid(
                    "gene index",
                    format!("< {}", self.chromosome.len()),
                    i.to_string(),
                ));
            }
        }
        for &i in indices {
            self.mutate_gene(i, rng)?;
        }
        Ok(())
    }

    fn sample_distinct(&self, pool: &[usize], k: usize, rng: &mut impl RandomGenerator) -> Vec<usize> {
        let mut pool = pool.to_vec();
        let k = k.min(pool.len());
        let mut chosen = Vec::with_capacity(k);
        for _ in 0..k {
            let idx = rng.gen_range_usize(0, pool.len());
            chosen.push(pool.swap_remove(idx));
        }
        chosen
    }

    /// Mutates `k` distinct random gene positions (any kind).
    pub fn mutate_random(&mut self, k: usize, rng: &mut impl RandomGenerator) -> Result<(), DcgpError> {
        let all: Vec<usize> = (0..self.chromosome.len()).collect();
        let chosen = self.sample_distinct(&all, k, rng);
        self.mutate_genes(&chosen, rng)
    }

    /// Mutates `k` positions drawn from the current active-gene set.
    pub fn mutate_active(&mut self, k: usize, rng: &mut impl RandomGenerator) -> Result<(), DcgpError> {
        let active = self.active_genes();
        let chosen = self.sample_distinct(&active, k, rng);
        self.mutate_genes(&chosen, rng)
    }

    fn active_genes_of_kind(&self, kind: GeneKind) -> Vec<usize> {
        self.active_genes().into_iter().filter(|&g| self.gene_kind(g) == kind).collect()
    }

    pub fn mutate_active_fgene(&mut self, k: usize, rng: &mut impl RandomGenerator) -> Result<(), DcgpError> {
        let pool = self.active_genes_of_kind(GeneKind::Function);
        let chosen = self.sample_distinct(&pool, k, rng);
        self.mutate_genes(&chosen, rng)
    }

    pub fn mutate_active_cgene(&mut self, k: usize, rng: &mut impl RandomGenerator) -> Result<(), DcgpError> {
        let pool = self.active_genes_of_kind(GeneKind::Connection);
        let chosen = self.sample_distinct(&pool, k, rng);
        self.mutate_genes(&chosen, rng)
    }

    pub fn mutate_ogene(&mut self, k: usize, rng: &mut impl RandomGenerator) -> Result<(), DcgpError> {
        let pool: Vec<usize> = (self.output_genes_start()..self.chromosome.len()).collect();
        let chosen = self.sample_distinct(&pool, k, rng);
        self.mutate_genes(&chosen, rng)
    }

    /// Rewrites the function gene of every node an output selector points to.
    /// Fails if `kernel_id` is out of the kernel set's bound.
    pub fn set_output_f(&mut self, kernel_id: usize) -> Result<(), DcgpError> {
        if kernel_id >= self.kernels.len() {
            return Err(DcgpError::invalid("kernel id", format!("< {}", self.kernels.len()), kernel_id.to_string()));
        }
        let out_start = self.output_genes_start();
        let targets: Vec<usize> = self.chromosome[out_start..]
            .iter()
            .filter(|&&node| node >= self.n)
            .copied()
            .collect();
        for node in targets {
            let gene = self.node_gene_start(node);
            self.chromosome[gene] = kernel_id;
        }
        self.refresh_active_nodes();
        Ok(())
    }

    /// Symbolic pretty-printing: evaluates through the `String` element using
    /// each kernel's `print` closure, with `x0..x{n-1}` as variable names.
    pub fn pretty(&self) -> Result<Vec<String>, DcgpError> {
        let point: Vec<String> = (0..self.n).map(|i| format!("x{i}")).collect();
        let mut values: Vec<Option<String>> = vec![None; self.n + self.r * self.c];
        for (i, v) in point.into_iter().enumerate() {
            values[i] = Some(v);
        }
        for &node in &self.active_nodes {
            if node < self.n {
                continue;
            }
            let j = self.node_id_column(node);
            let kernel_idx = self.node_function(node);
            let kernel = self.kernels.get(kernel_idx).expect("function gene within bounds");
            let args: Vec<String> = self.node_connections(node)[..self.arity[j]]
                .iter()
                .map(|&src| values[src].clone().expect("source node computed before consumer"))
                .collect();
            values[node] = Some(kernel.print(&args));
        }
        let out_start = self.output_genes_start();
        Ok(self.chromosome[out_start..]
            .iter()
            .map(|&src| values[src].clone().expect("output source node computed"))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::KernelSet;
    use crate::random::DcgpRandomGenerator;

    fn kernels() -> KernelSet {
        KernelSet::from_names(&["sum", "diff", "mul", "div"]).unwrap()
    }

    /// `(n=2, m=2, r=2, c=2, L=2, arity=2, kernels=[sum,diff,mul,div])` with
    /// chromosome `[0,1,1, 0,0,0, 2,0,2, 2,0,2, 4,3]` — this is the chromosome
    /// given verbatim, but with c=2 rather than c=3: that chromosome has 14
    /// genes, which only matches `r*c=4` internal nodes (c=3 would need 6 and
    /// a 20-gene chromosome), so c=3 is a typo for c=2. With c=2 the node
    /// reconstruction is: node2 = sum(x1,x1) = 2x1; node3 = sum(x0,x0) = 2x0;
    /// node4 = mul(x0, node2) = 2x0x1; output0 = node4, output1 = node3 —
    /// exactly "the encoded functions are 2x0x1 and 2x0" as stated.
    fn grammar_check_expression() -> Expression {
        let mut expr = Expression::new(2, 2, 2, 2, 2, Arity::Scalar(2), kernels(), Some(1)).unwrap();
        expr.set(vec![0, 1, 1, 0, 0, 0, 2, 0, 2, 2, 0, 2, 4, 3]).unwrap();
        expr
    }

    #[test]
    fn grammar_check_matches_hand_derivation() {
        let expr = grammar_check_expression();
        let out = expr.call(&[1.0, 1.0]).unwrap();
        assert_eq!(out, vec![2.0, 2.0]);
        // The spec's own worked value here (`[0, 0]`) doesn't square with
        // "the encoded functions are 2x0x1 and 2x0" (2x0 at x0=1 is 2, not
        // 0) — we assert the arithmetic these functions actually produce.
        let out2 = expr.call(&[1.0, 0.0]).unwrap();
        assert_eq!(out2, vec![0.0, 2.0]);
    }

    #[test]
    fn construction_rejects_degenerate_shapes() {
        assert!(Expression::new(0, 1, 1, 1, 1, Arity::Scalar(2), kernels(), None).is_err());
        assert!(Expression::new(1, 0, 1, 1, 1, Arity::Scalar(2), kernels(), None).is_err());
        assert!(Expression::new(1, 1, 0, 1, 1, Arity::Scalar(2), kernels(), None).is_err());
        assert!(Expression::new(1, 1, 1, 0, 1, Arity::Scalar(2), kernels(), None).is_err());
        assert!(Expression::new(1, 1, 1, 1, 0, Arity::Scalar(2), kernels(), None).is_err());
        assert!(Expression::new(1, 1, 1, 1, 1, Arity::Scalar(0), kernels(), None).is_err());
        assert!(Expression::new(1, 1, 1, 1, 1, Arity::Scalar(2), KernelSet::new(), None).is_err());
    }

    #[test]
    fn set_rejects_wrong_length_or_out_of_bound_chromosome() {
        let mut expr = Expression::new(2, 1, 2, 2, 2, Arity::Scalar(2), kernels(), Some(0)).unwrap();
        assert!(expr.set(vec![0, 0]).is_err());
        let mut bad = expr.chromosome().to_vec();
        bad[0] = 9999;
        assert!(expr.set(bad).is_err());
    }

    #[test]
    fn active_set_is_idempotent_and_pure() {
        let expr = grammar_check_expression();
        let a1 = expr.active_nodes().to_vec();
        let a2 = expr.compute_active_nodes();
        assert_eq!(a1, a2);
        let mut sorted = a1.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(a1, sorted);
    }

    #[test]
    fn call_is_deterministic() {
        let expr = grammar_check_expression();
        let a = expr.call(&[0.3, 0.7]).unwrap();
        let b = expr.call(&[0.3, 0.7]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn call_rejects_wrong_point_size() {
        let expr = grammar_check_expression();
        assert!(expr.call(&[1.0]).is_err());
        assert!(expr.call(&[1.0, 2.0, 3.0]).is_err());
    }

    #[test]
    fn mutation_never_breaks_validity() {
        let mut rng = DcgpRandomGenerator::new_from_seed(Some(123));
        let mut expr = Expression::new(3, 2, 3, 4, 2, Arity::Scalar(2), kernels(), Some(5)).unwrap();
        for _ in 0..500 {
            expr.mutate_random(2, &mut rng).unwrap();
            assert!(expr.is_valid(expr.chromosome()));
            expr.mutate_active(1, &mut rng).unwrap();
            assert!(expr.is_valid(expr.chromosome()));
        }
    }

    #[test]
    fn mutate_gene_excludes_current_value() {
        let mut rng = DcgpRandomGenerator::new_from_seed(Some(9));
        let mut expr = Expression::new(2, 1, 1, 1, 1, Arity::Scalar(2), kernels(), Some(2)).unwrap();
        for i in 0..expr.chromosome_len() {
            let before = expr.chromosome()[i];
            expr.mutate_gene(i, &mut rng).unwrap();
            let after = expr.chromosome()[i];
            let (lo, hi) = expr.gene_bounds(i);
            if hi > lo {
                assert_ne!(before, after);
            }
        }
    }

    #[test]
    fn mutate_gene_out_of_range_fails_closed() {
        let mut rng = DcgpRandomGenerator::new_from_seed(Some(1));
        let mut expr = Expression::new(2, 1, 1, 1, 1, Arity::Scalar(2), kernels(), Some(2)).unwrap();
        let before = expr.chromosome().to_vec();
        assert!(expr.mutate_gene(9999, &mut rng).is_err());
        assert_eq!(expr.chromosome(), before.as_slice());
    }

    #[test]
    fn set_output_f_rewrites_every_output_function_gene() {
        let mut expr = grammar_check_expression();
        let div_idx = expr.kernels().iter().position(|k| k.name == crate::kernel::KernelName::Div).unwrap();
        expr.set_output_f(div_idx).unwrap();
        // Both outputs (genes 4 and 3) point at internal nodes, so both of
        // their function genes now read `div`.
        for &node in &[4usize, 3usize] {
            let j = (node - expr.n()) / expr.r();
            let start = expr.column_gene_offset[j] + ((node - expr.n()) % expr.r()) * (expr.arity()[j] + 1);
            assert_eq!(expr.chromosome()[start], div_idx);
        }
    }

    #[test]
    fn pretty_print_matches_call_shape() {
        let expr = grammar_check_expression();
        let printed = expr.pretty().unwrap();
        assert_eq!(printed.len(), 2);
        assert!(printed[0].contains('x'));
    }
}
