// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::lexer::escape;

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    Xor,
    And,
    Equals,
    NotEquals,
    Equivalent,
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
    Union,
    Plus,
    Minus,
    Concatenate,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Or => "or",
            Self::Xor => "xor",
            Self::And => "and",
            Self::Equals => "=",
            Self::NotEquals => "!=",
            Self::Equivalent => "~",
            Self::LessThan => "<",
            Self::LessOrEqual => "<=",
            Self::GreaterThan => ">",
            Self::GreaterOrEqual => ">=",
            Self::Union => "|",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Concatenate => "&",
        }
    }

    pub fn is_boolean(&self) -> bool {
        !matches!(
            self,
            Self::Union | Self::Plus | Self::Minus | Self::Concatenate
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    /// Kept as written.
    Number(String),
    Boolean(bool),
}

/// A parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    /// `%name`
    Variable(String),
    /// `$this`
    This,
    /// A name at the start of a path.
    Identifier(String),
    Member {
        target: Box<Expr>,
        name: String,
    },
    Function {
        target: Option<Box<Expr>>,
        name: String,
        args: Vec<Expr>,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Parenthesised sub-expression.
    Group(Box<Expr>),
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(Literal::String(s)) => write!(f, "'{}'", escape(s, '\'')),
            Expr::Literal(Literal::Number(n)) => f.write_str(n),
            Expr::Literal(Literal::Boolean(b)) => write!(f, "{b}"),
            Expr::Variable(name) => write!(f, "%{name}"),
            Expr::This => f.write_str("$this"),
            Expr::Identifier(name) => f.write_str(name),
            Expr::Member { target, name } => write!(f, "{target}.{name}"),
            Expr::Function { target, name, args } => {
                if let Some(t) = target {
                    write!(f, "{t}.")?;
                }
                write!(f, "{name}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{a}")?;
                }
                f.write_str(")")
            }
            Expr::Index { target, index } => write!(f, "{target}[{index}]"),
            Expr::Binary { op, left, right } => write!(f, "{left} {} {right}", op.symbol()),
            Expr::Group(inner) => write!(f, "({inner})"),
        }
    }
}
