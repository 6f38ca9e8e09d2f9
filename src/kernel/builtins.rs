//! Built-in kernels: `sum`, `diff`, `mul`, `div`, `pdiv`, `exp`, `log`, `sin`,
//! `cos`, `tanh`, `sig`, `ReLu`, `ELU`, `ISRU`.
//!
//! Variadic kernels (`sum`, `diff`, `mul`, `div`, `pdiv`) fold left-to-right
//! over the node's arity-many arguments; unary transcendentals act on the
//! first argument and ignore the rest (a node with arity > 1 feeding a
//! unary kernel is valid per the grid encoding — the kernel simply doesn't
//! look past its first input).
use crate::element::Element;
use crate::kernel::Kernel;

/// Threshold below which `pdiv`'s divisor is treated as zero.
pub const PDIV_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelName {
    Sum,
    Diff,
    Mul,
    Div,
    Pdiv,
    Exp,
    Log,
    Sin,
    Cos,
    Tanh,
    Sig,
    ReLu,
    ELU,
    ISRU,
}

impl KernelName {
    pub fn as_str(&self) -> &'static str {
        match self {
            KernelName::Sum => "sum",
            KernelName::Diff => "diff",
            KernelName::Mul => "mul",
            KernelName::Div => "div",
            KernelName::Pdiv => "pdiv",
            KernelName::Exp => "exp",
            KernelName::Log => "log",
            KernelName::Sin => "sin",
            KernelName::Cos => "cos",
            KernelName::Tanh => "tanh",
            KernelName::Sig => "sig",
            KernelName::ReLu => "ReLu",
            KernelName::ELU => "ELU",
            KernelName::ISRU => "ISRU",
        }
    }

    /// Whether this kernel is one of the differentiable activations
    /// `WeightedExpression` restricts its kernel set to.
    pub fn is_differentiable_activation(&self) -> bool {
        matches!(
            self,
            KernelName::Tanh | KernelName::Sig | KernelName::ReLu | KernelName::ELU | KernelName::ISRU
        )
    }
}

fn fold_left<E: Element>(args: &[E], op: impl Fn(&E, &E) -> E) -> E {
    let mut acc = args[0].clone();
    for a in &args[1..] {
        acc = op(&acc, a);
    }
    acc
}

fn sum_impl<E: Element>(args: &[E]) -> E {
    fold_left(args, |a, b| a.add(b))
}

fn diff_impl<E: Element>(args: &[E]) -> E {
    if args.len() == 1 {
        return args[0].neg();
    }
    fold_left(args, |a, b| a.add(&b.neg()))
}

fn mul_impl<E: Element>(args: &[E]) -> E {
    fold_left(args, |a, b| a.mul(b))
}

fn div_impl<E: Element>(args: &[E]) -> E {
    fold_left(args, |a, b| a.div(b))
}

fn pdiv_impl<E: Element>(args: &[E]) -> E {
    fold_left(args, |a, b| {
        if b.constant_part().abs() > PDIV_EPSILON {
            a.div(b)
        } else {
            a.one_like()
        }
    })
}

fn exp_impl<E: Element>(args: &[E]) -> E {
    args[0].exp()
}
fn log_impl<E: Element>(args: &[E]) -> E {
    args[0].ln()
}
fn sin_impl<E: Element>(args: &[E]) -> E {
    args[0].sin()
}
fn cos_impl<E: Element>(args: &[E]) -> E {
    args[0].cos()
}
fn tanh_impl<E: Element>(args: &[E]) -> E {
    args[0].tanh()
}
fn sig_impl<E: Element>(args: &[E]) -> E {
    args[0].sigmoid()
}
fn relu_impl<E: Element>(args: &[E]) -> E {
    args[0].relu()
}
fn elu_impl<E: Element>(args: &[E]) -> E {
    args[0].elu()
}
fn isru_impl<E: Element>(args: &[E]) -> E {
    args[0].isru()
}

fn print_fn_for(name: KernelName) -> fn(&[String]) -> String {
    match name {
        KernelName::Sum => print_sum,
        KernelName::Diff => print_diff,
        KernelName::Mul => print_mul,
        KernelName::Div => print_div,
        KernelName::Pdiv => print_pdiv,
        KernelName::Exp => print_exp,
        KernelName::Log => print_log,
        KernelName::Sin => print_sin,
        KernelName::Cos => print_cos,
        KernelName::Tanh => print_tanh,
        KernelName::Sig => print_sig,
        KernelName::ReLu => print_relu,
        KernelName::ELU => print_elu,
        KernelName::ISRU => print_isru,
    }
}

fn print_sum(args: &[String]) -> String {
    format!("({})", args.join(" + "))
}
fn print_diff(args: &[String]) -> String {
    if args.len() == 1 {
        format!("(-{})", args[0])
    } else {
        format!("({})", args.join(" - "))
    }
}
fn print_mul(args: &[String]) -> String {
    format!("({})", args.join(" * "))
}
fn print_div(args: &[String]) -> String {
    format!("({})", args.join(" / "))
}
fn print_pdiv(args: &[String]) -> String {
    format!("({})", args.join(" /p "))
}
fn print_exp(args: &[String]) -> String {
    format!("exp({})", args[0])
}
fn print_log(args: &[String]) -> String {
    format!("log({})", args[0])
}
fn print_sin(args: &[String]) -> String {
    format!("sin({})", args[0])
}
fn print_cos(args: &[String]) -> String {
    format!("cos({})", args[0])
}
fn print_tanh(args: &[String]) -> String {
    format!("tanh({})", args[0])
}
fn print_sig(args: &[String]) -> String {
    format!("sig({})", args[0])
}
fn print_relu(args: &[String]) -> String {
    format!("ReLu({})", args[0])
}
fn print_elu(args: &[String]) -> String {
    format!("ELU({})", args[0])
}
fn print_isru(args: &[String]) -> String {
    format!("ISRU({})", args[0])
}

/// Looks up a built-in kernel by its canonical name. `None` for unknown names.
pub fn by_name(name: &str) -> Option<Kernel> {
    use crate::element::Gdual;
    let (kname, eval_f64, eval_gdual): (KernelName, fn(&[f64]) -> f64, fn(&[Gdual]) -> Gdual) = match name {
        "sum" => (KernelName::Sum, sum_impl, sum_impl),
        "diff" => (KernelName::Diff, diff_impl, diff_impl),
        "mul" => (KernelName::Mul, mul_impl, mul_impl),
        "div" => (KernelName::Div, div_impl, div_impl),
        "pdiv" => (KernelName::Pdiv, pdiv_impl, pdiv_impl),
        "exp" => (KernelName::Exp, exp_impl, exp_impl),
        "log" => (KernelName::Log, log_impl, log_impl),
        "sin" => (KernelName::Sin, sin_impl, sin_impl),
        "cos" => (KernelName::Cos, cos_impl, cos_impl),
        "tanh" => (KernelName::Tanh, tanh_impl, tanh_impl),
        "sig" => (KernelName::Sig, sig_impl, sig_impl),
        "ReLu" => (KernelName::ReLu, relu_impl, relu_impl),
        "ELU" => (KernelName::ELU, elu_impl, elu_impl),
        "ISRU" => (KernelName::ISRU, isru_impl, isru_impl),
        _ => return None,
    };
    Some(Kernel {
        name: kname,
        eval_f64,
        eval_gdual,
        print: print_fn_for(kname),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("sum", &[2.0, 3.0], 5.0)]
    #[case("diff", &[2.0, 3.0], -1.0)]
    #[case("mul", &[2.0, 3.0], 6.0)]
    #[case("pdiv", &[6.0, 3.0], 2.0)]
    fn binary_kernel_matches_expected_value(#[case] name: &str, #[case] args: &[f64], #[case] expected: f64) {
        let k = by_name(name).unwrap();
        assert_eq!(k.call(args), expected);
    }

    #[test]
    fn pdiv_protects_near_zero_divisor() {
        let k = by_name("pdiv").unwrap();
        let out = k.call(&[1.0_f64, 1e-13]);
        assert_eq!(out, 1.0);
        let out2 = k.call(&[4.0_f64, 2.0]);
        assert_eq!(out2, 2.0);
    }

    #[test]
    fn sum_is_variadic() {
        let k = by_name("sum").unwrap();
        assert_eq!(k.call(&[1.0_f64, 2.0, 3.0]), 6.0);
    }

    #[test]
    fn print_matches_numeric_arity() {
        let k = by_name("mul").unwrap();
        assert_eq!(k.print(&["x0".into(), "x1".into()]), "(x0 * x1)");
    }

    #[test]
    fn unknown_name_returns_none() {
        assert!(by_name("frobnicate").is_none());
    }
}
