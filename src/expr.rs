//! Scalar expression trees used for deterministic nodes and distribution
//! parameters.
//!
//! Expressions are written against node names (`Expr<String>`) while a model
//! is being described and resolved to dense node ids (`Expr<NodeId>`) when
//! the graph is built. They are pure data: evaluation has no side effects
//! and depends only on the referenced node values.

use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Sqrt,
    Exp,
    Ln,
    /// Multiplicative inverse, `1 / x`.
    Recip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

/// A scalar expression over node references of type `R`.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr<R> {
    Const(f64),
    Ref(R),
    Unary(UnaryOp, Box<Expr<R>>),
    Binary(BinaryOp, Box<Expr<R>>, Box<Expr<R>>),
}

impl<R> Expr<R> {
    pub fn constant(value: f64) -> Self {
        Expr::Const(value)
    }

    /// True if this expression is a bare node reference.
    ///
    /// Bare references wire directly into the graph; anything else is
    /// hoisted into a lifted deterministic node by the builder.
    pub fn is_ref(&self) -> bool {
        matches!(self, Expr::Ref(_))
    }

    pub fn sqrt(self) -> Self {
        Expr::Unary(UnaryOp::Sqrt, Box::new(self))
    }

    pub fn exp(self) -> Self {
        Expr::Unary(UnaryOp::Exp, Box::new(self))
    }

    pub fn ln(self) -> Self {
        Expr::Unary(UnaryOp::Ln, Box::new(self))
    }

    pub fn recip(self) -> Self {
        Expr::Unary(UnaryOp::Recip, Box::new(self))
    }

    pub fn pow(self, exponent: Expr<R>) -> Self {
        Expr::Binary(BinaryOp::Pow, Box::new(self), Box::new(exponent))
    }

    /// Collect the free node references, left to right, duplicates included.
    pub fn refs(&self) -> Vec<&R> {
        let mut out = Vec::new();
        self.collect_refs(&mut out);
        out
    }

    fn collect_refs<'a>(&'a self, out: &mut Vec<&'a R>) {
        match self {
            Expr::Const(_) => {}
            Expr::Ref(r) => out.push(r),
            Expr::Unary(_, a) => a.collect_refs(out),
            Expr::Binary(_, a, b) => {
                a.collect_refs(out);
                b.collect_refs(out);
            }
        }
    }

    /// Rewrite every reference through `f`, preserving structure.
    pub fn map_refs<S, E>(&self, f: &mut impl FnMut(&R) -> Result<S, E>) -> Result<Expr<S>, E> {
        Ok(match self {
            Expr::Const(c) => Expr::Const(*c),
            Expr::Ref(r) => Expr::Ref(f(r)?),
            Expr::Unary(op, a) => Expr::Unary(*op, Box::new(a.map_refs(f)?)),
            Expr::Binary(op, a, b) => {
                Expr::Binary(*op, Box::new(a.map_refs(f)?), Box::new(b.map_refs(f)?))
            }
        })
    }

    /// Evaluate against a scalar value lookup for the referenced nodes.
    pub fn eval(&self, lookup: &impl Fn(&R) -> f64) -> f64 {
        match self {
            Expr::Const(c) => *c,
            Expr::Ref(r) => lookup(r),
            Expr::Unary(op, a) => {
                let a = a.eval(lookup);
                match op {
                    UnaryOp::Neg => -a,
                    UnaryOp::Sqrt => a.sqrt(),
                    UnaryOp::Exp => a.exp(),
                    UnaryOp::Ln => a.ln(),
                    UnaryOp::Recip => a.recip(),
                }
            }
            Expr::Binary(op, a, b) => {
                let a = a.eval(lookup);
                let b = b.eval(lookup);
                match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div => a / b,
                    BinaryOp::Pow => a.powf(b),
                }
            }
        }
    }
}

impl Expr<String> {
    /// Reference a node by name.
    pub fn var(name: impl Into<String>) -> Self {
        Expr::Ref(name.into())
    }
}

impl<R> From<f64> for Expr<R> {
    fn from(value: f64) -> Self {
        Expr::Const(value)
    }
}

macro_rules! impl_binop {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<R> $trait for Expr<R> {
            type Output = Expr<R>;
            fn $method(self, rhs: Expr<R>) -> Expr<R> {
                Expr::Binary($op, Box::new(self), Box::new(rhs))
            }
        }

        impl<R> $trait<f64> for Expr<R> {
            type Output = Expr<R>;
            fn $method(self, rhs: f64) -> Expr<R> {
                Expr::Binary($op, Box::new(self), Box::new(Expr::Const(rhs)))
            }
        }
    };
}

impl_binop!(Add, add, BinaryOp::Add);
impl_binop!(Sub, sub, BinaryOp::Sub);
impl_binop!(Mul, mul, BinaryOp::Mul);
impl_binop!(Div, div, BinaryOp::Div);

impl<R> Neg for Expr<R> {
    type Output = Expr<R>;
    fn neg(self) -> Expr<R> {
        Expr::Unary(UnaryOp::Neg, Box::new(self))
    }
}

impl<R: fmt::Display> fmt::Display for Expr<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(c) => write!(f, "{c}"),
            Expr::Ref(r) => write!(f, "{r}"),
            Expr::Unary(op, a) => match op {
                UnaryOp::Neg => write!(f, "(-{a})"),
                UnaryOp::Sqrt => write!(f, "sqrt({a})"),
                UnaryOp::Exp => write!(f, "exp({a})"),
                UnaryOp::Ln => write!(f, "ln({a})"),
                UnaryOp::Recip => write!(f, "(1 / {a})"),
            },
            Expr::Binary(op, a, b) => {
                let sym = match op {
                    BinaryOp::Add => "+",
                    BinaryOp::Sub => "-",
                    BinaryOp::Mul => "*",
                    BinaryOp::Div => "/",
                    BinaryOp::Pow => "^",
                };
                write!(f, "({a} {sym} {b})")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn eval_matches_hand_computation() {
        // 1 / sqrt(tau), the precision-to-sd conversion.
        let e = Expr::var("tau").sqrt().recip();
        let v = e.eval(&|name: &String| if name == "tau" { 4.0 } else { f64::NAN });
        assert_eq!(v, 0.5);
    }

    #[test]
    fn refs_are_collected_in_order() {
        let e = Expr::var("a") * Expr::var("b") + Expr::var("a");
        let names: Vec<_> = e.refs().into_iter().cloned().collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string(), "a".to_string()]);
    }

    #[test]
    fn bare_ref_is_detected() {
        assert!(Expr::var("mu").is_ref());
        assert!(!(Expr::var("mu") + 1.0).is_ref());
        assert!(!Expr::<String>::constant(2.0).is_ref());
    }

    #[test]
    fn display_is_readable() {
        let e = Expr::var("tau").sqrt().recip();
        assert_eq!(e.to_string(), "(1 / sqrt(tau))");
    }
}
