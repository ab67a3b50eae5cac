//! Formula engine for parametrised correction content.
//!
//! Accepts the subset of ROOT TFormula syntax used by published correction
//! tables: variables `x`, `y`, `z`, `t` (bound positionally to the node's
//! declared inputs), parameters `[i]` (substituted at compile time),
//! arithmetic (`+ - * /`), power (`^`), comparisons, boolean operators and
//! the functions `abs sqrt log log10 exp pow min max erf atan cos sin tanh`
//! (also under their `TMath::` names).

use cal_core::{Error, Result};

// ── AST ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Expr {
    Number(f64),
    Var(usize),
    UnaryNeg(Box<Expr>),
    UnaryNot(Box<Expr>),
    BinOp(BinOp, Box<Expr>, Box<Expr>),
    Call(Func, Vec<Expr>),
}

#[derive(Debug, Clone, Copy)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy)]
enum Func {
    Abs,
    Sqrt,
    Log,
    Log10,
    Exp,
    Pow,
    Min,
    Max,
    Erf,
    Atan,
    Cos,
    Sin,
    Tanh,
}

impl Func {
    fn lookup(name: &str) -> Option<Func> {
        let bare = name.strip_prefix("TMath::").unwrap_or(name);
        Some(match bare {
            "abs" | "fabs" | "Abs" => Func::Abs,
            "sqrt" | "Sqrt" => Func::Sqrt,
            "log" | "Log" => Func::Log,
            "log10" | "Log10" => Func::Log10,
            "exp" | "Exp" => Func::Exp,
            "pow" | "Power" => Func::Pow,
            "min" | "Min" => Func::Min,
            "max" | "Max" => Func::Max,
            "erf" | "Erf" => Func::Erf,
            "atan" | "ATan" => Func::Atan,
            "cos" | "Cos" => Func::Cos,
            "sin" | "Sin" => Func::Sin,
            "tanh" | "TanH" => Func::Tanh,
            _ => return None,
        })
    }

    fn arity(self) -> usize {
        match self {
            Func::Pow | Func::Min | Func::Max => 2,
            _ => 1,
        }
    }
}

// ── Compiled formula ───────────────────────────────────────────

/// A compiled formula ready for evaluation.
#[derive(Debug, Clone)]
pub struct Formula {
    ast: Expr,
    n_vars: usize,
}

impl Formula {
    /// Parse `expression`, binding `x, y, z, t` to the first `n_vars` inputs
    /// and substituting `[i]` with `parameters[i]`.
    pub fn compile(expression: &str, n_vars: usize, parameters: &[f64]) -> Result<Self> {
        if n_vars > 4 {
            return Err(Error::Config(format!(
                "formula '{expression}' declares {n_vars} variables, at most 4 are supported"
            )));
        }
        let tokens = tokenize(expression)?;
        let mut parser = Parser::new(&tokens, n_vars, parameters);
        let ast = parser.parse_or()?;
        if parser.pos < parser.tokens.len() {
            return Err(Error::Config(format!(
                "unexpected token after formula: {:?}",
                parser.tokens[parser.pos]
            )));
        }
        Ok(Formula { ast, n_vars })
    }

    /// Number of bound variables.
    pub fn n_vars(&self) -> usize {
        self.n_vars
    }

    /// Evaluate for one set of variable values.
    ///
    /// `vars` must hold at least `n_vars` values.
    pub fn eval(&self, vars: &[f64]) -> f64 {
        eval_expr(&self.ast, vars)
    }
}

// ── Evaluation ─────────────────────────────────────────────────

fn truth(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

fn eval_expr(e: &Expr, vals: &[f64]) -> f64 {
    match e {
        Expr::Number(n) => *n,
        Expr::Var(i) => vals[*i],
        Expr::UnaryNeg(a) => -eval_expr(a, vals),
        Expr::UnaryNot(a) => truth(eval_expr(a, vals) <= 0.0),
        Expr::BinOp(op, a, b) => {
            let lhs = eval_expr(a, vals);
            let rhs = eval_expr(b, vals);
            match op {
                BinOp::Add => lhs + rhs,
                BinOp::Sub => lhs - rhs,
                BinOp::Mul => lhs * rhs,
                BinOp::Div => lhs / rhs,
                BinOp::Pow => lhs.powf(rhs),
                BinOp::Eq => truth(lhs == rhs),
                BinOp::Ne => truth(lhs != rhs),
                BinOp::Lt => truth(lhs < rhs),
                BinOp::Le => truth(lhs <= rhs),
                BinOp::Gt => truth(lhs > rhs),
                BinOp::Ge => truth(lhs >= rhs),
                BinOp::And => truth(lhs > 0.0 && rhs > 0.0),
                BinOp::Or => truth(lhs > 0.0 || rhs > 0.0),
            }
        }
        Expr::Call(f, args) => {
            let a0 = || eval_expr(&args[0], vals);
            let a1 = || eval_expr(&args[1], vals);
            match f {
                Func::Abs => a0().abs(),
                Func::Sqrt => a0().sqrt(),
                Func::Log => a0().ln(),
                Func::Log10 => a0().log10(),
                Func::Exp => a0().exp(),
                Func::Pow => a0().powf(a1()),
                Func::Min => a0().min(a1()),
                Func::Max => a0().max(a1()),
                Func::Erf => statrs::function::erf::erf(a0()),
                Func::Atan => a0().atan(),
                Func::Cos => a0().cos(),
                Func::Sin => a0().sin(),
                Func::Tanh => a0().tanh(),
            }
        }
    }
}

// ── Tokenizer ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if i + 1 < chars.len() {
            let tok = match (c, chars[i + 1]) {
                ('&', '&') => Some(Token::And),
                ('|', '|') => Some(Token::Or),
                ('=', '=') => Some(Token::Eq),
                ('!', '=') => Some(Token::Ne),
                ('<', '=') => Some(Token::Le),
                ('>', '=') => Some(Token::Ge),
                _ => None,
            };
            if let Some(t) = tok {
                tokens.push(t);
                i += 2;
                continue;
            }
        }

        let single = match c {
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '^' => Some(Token::Caret),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '[' => Some(Token::LBracket),
            ']' => Some(Token::RBracket),
            ',' => Some(Token::Comma),
            '<' => Some(Token::Lt),
            '>' => Some(Token::Gt),
            '!' => Some(Token::Not),
            _ => None,
        };
        if let Some(t) = single {
            tokens.push(t);
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < chars.len()
                && (chars[i].is_ascii_digit()
                    || chars[i] == '.'
                    || chars[i] == 'e'
                    || chars[i] == 'E'
                    || ((chars[i] == '+' || chars[i] == '-')
                        && i > start
                        && (chars[i - 1] == 'e' || chars[i - 1] == 'E')))
            {
                i += 1;
            }
            let s: String = chars[start..i].iter().collect();
            let n: f64 =
                s.parse().map_err(|_| Error::Config(format!("invalid number in formula: '{s}'")))?;
            tokens.push(Token::Num(n));
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() {
                if chars[i].is_ascii_alphanumeric() || chars[i] == '_' {
                    i += 1;
                } else if chars[i] == ':' && chars.get(i + 1) == Some(&':') {
                    i += 2;
                } else {
                    break;
                }
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else {
            return Err(Error::Config(format!("unexpected character in formula: '{c}'")));
        }
    }

    Ok(tokens)
}

// ── Parser (recursive descent) ─────────────────────────────────

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    n_vars: usize,
    parameters: &'a [f64],
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token], n_vars: usize, parameters: &'a [f64]) -> Self {
        Self { tokens, pos: 0, n_vars, parameters }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        match self.advance() {
            Some(t) if t == expected => Ok(()),
            other => Err(Error::Config(format!("expected {expected:?}, got {other:?}"))),
        }
    }

    fn resolve_var(&self, name: &str) -> Result<usize> {
        let idx = match name {
            "x" => 0,
            "y" => 1,
            "z" => 2,
            "t" => 3,
            _ => return Err(Error::Config(format!("unknown formula variable '{name}'"))),
        };
        if idx >= self.n_vars {
            return Err(Error::Config(format!(
                "formula variable '{name}' is not bound ({} inputs declared)",
                self.n_vars
            )));
        }
        Ok(idx)
    }

    // ── Grammar rules ──────────────────────────────────────────

    fn parse_or(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::BinOp(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_cmp()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.advance();
            let rhs = self.parse_cmp()?;
            lhs = Expr::BinOp(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_cmp(&mut self) -> Result<Expr> {
        let lhs = self.parse_add()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinOp::Eq,
            Some(Token::Ne) => BinOp::Ne,
            Some(Token::Lt) => BinOp::Lt,
            Some(Token::Le) => BinOp::Le,
            Some(Token::Gt) => BinOp::Gt,
            Some(Token::Ge) => BinOp::Ge,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_add()?;
        Ok(Expr::BinOp(op, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_add(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_mul()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_mul()?;
            lhs = Expr::BinOp(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_mul(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::BinOp(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::Minus) => {
                self.advance();
                let e = self.parse_unary()?;
                Ok(Expr::UnaryNeg(Box::new(e)))
            }
            Some(Token::Plus) => {
                self.advance();
                self.parse_unary()
            }
            Some(Token::Not) => {
                self.advance();
                let e = self.parse_unary()?;
                Ok(Expr::UnaryNot(Box::new(e)))
            }
            _ => self.parse_pow(),
        }
    }

    // `^` binds tighter than unary minus and associates to the right.
    fn parse_pow(&mut self) -> Result<Expr> {
        let base = self.parse_atom()?;
        if matches!(self.peek(), Some(Token::Caret)) {
            self.advance();
            let exp = self.parse_unary()?;
            return Ok(Expr::BinOp(BinOp::Pow, Box::new(base), Box::new(exp)));
        }
        Ok(base)
    }

    fn parse_atom(&mut self) -> Result<Expr> {
        match self.advance().cloned() {
            Some(Token::Num(n)) => Ok(Expr::Number(n)),
            Some(Token::LParen) => {
                let e = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(e)
            }
            Some(Token::LBracket) => {
                let idx = match self.advance().cloned() {
                    Some(Token::Num(n)) if n >= 0.0 && n.fract() == 0.0 => n as usize,
                    other => {
                        return Err(Error::Config(format!(
                            "expected parameter index, got {other:?}"
                        )));
                    }
                };
                self.expect(&Token::RBracket)?;
                let value = self.parameters.get(idx).copied().ok_or_else(|| {
                    Error::Config(format!(
                        "formula references parameter [{idx}] but only {} are given",
                        self.parameters.len()
                    ))
                })?;
                Ok(Expr::Number(value))
            }
            Some(Token::Ident(name)) => {
                if matches!(self.peek(), Some(Token::LParen)) {
                    self.advance();
                    let func = Func::lookup(&name).ok_or_else(|| {
                        Error::Config(format!("unknown formula function: '{name}'"))
                    })?;
                    let mut args = vec![self.parse_or()?];
                    while matches!(self.peek(), Some(Token::Comma)) {
                        self.advance();
                        args.push(self.parse_or()?);
                    }
                    self.expect(&Token::RParen)?;
                    if args.len() != func.arity() {
                        return Err(Error::Config(format!(
                            "function '{name}' takes {} argument(s), got {}",
                            func.arity(),
                            args.len()
                        )));
                    }
                    Ok(Expr::Call(func, args))
                } else {
                    Ok(Expr::Var(self.resolve_var(&name)?))
                }
            }
            other => Err(Error::Config(format!(
                "expected number, variable, parameter or '(', got {other:?}"
            ))),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────
