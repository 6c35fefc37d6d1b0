//! Small expression language used for ODE right-hand sides, velocity fields
//! and initial conditions.
//!
//! Expressions are parsed into an AST, compiled to stack bytecode with all
//! names resolved to indices, then evaluated by a stateless VM that is
//! generic over [`Scalar`].

use crate::traits::{DynamicalSystem, Scalar};
use std::cell::RefCell;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EquationError {
    #[error("Unexpected token at position {0}")]
    UnexpectedToken(usize),
    #[error("Expected ')' at position {0}")]
    ExpectedClosingParen(usize),
    #[error("Trailing input at position {0}")]
    TrailingInput(usize),
    #[error("Invalid number literal: {0}")]
    InvalidNumber(String),
    #[error("Unknown variable or parameter: {0}")]
    UnknownSymbol(String),
    #[error("Unknown function: {0}")]
    UnknownFunction(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Sin,
    Cos,
    Tan,
    Exp,
    Log,
    Sqrt,
    Tanh,
    Abs,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "sin" => Function::Sin,
            "cos" => Function::Cos,
            "tan" => Function::Tan,
            "exp" => Function::Exp,
            "log" | "ln" => Function::Log,
            "sqrt" => Function::Sqrt,
            "tanh" => Function::Tanh,
            "abs" => Function::Abs,
            _ => return None,
        })
    }

    fn eval<T: Scalar>(self, a: T) -> T {
        match self {
            Function::Sin => a.sin(),
            Function::Cos => a.cos(),
            Function::Tan => a.tan(),
            Function::Exp => a.exp(),
            Function::Log => a.ln(),
            Function::Sqrt => a.sqrt(),
            Function::Tanh => a.tanh(),
            Function::Abs => a.abs(),
        }
    }
}

/// Instructions for the stack machine.
#[derive(Debug, Clone, Copy)]
pub enum OpCode {
    LoadConst(f64),
    /// Pushes a state/coordinate value by index.
    LoadVar(usize),
    /// Pushes a parameter value by index.
    LoadParam(usize),
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Neg,
    Call(Function),
}

#[derive(Debug, Clone, Default)]
pub struct Bytecode {
    pub ops: Vec<OpCode>,
}

impl Bytecode {
    /// Maximum stack depth reached during execution.
    pub fn stack_depth(&self) -> usize {
        let mut depth = 0usize;
        let mut max = 0usize;
        for op in &self.ops {
            match op {
                OpCode::LoadConst(_) | OpCode::LoadVar(_) | OpCode::LoadParam(_) => depth += 1,
                OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Pow => {
                    depth = depth.saturating_sub(1)
                }
                OpCode::Neg | OpCode::Call(_) => {}
            }
            max = max.max(depth);
        }
        max
    }
}

/// Stateless stack VM; the caller owns the stack buffer.
pub struct VM;

impl VM {
    pub fn execute<T: Scalar>(bytecode: &Bytecode, vars: &[T], params: &[T], stack: &mut Vec<T>) -> T {
        stack.clear();

        for op in &bytecode.ops {
            match *op {
                OpCode::LoadConst(val) => stack.push(T::from_f64(val).unwrap_or_else(T::nan)),
                OpCode::LoadVar(idx) => stack.push(vars[idx]),
                OpCode::LoadParam(idx) => stack.push(params[idx]),
                OpCode::Neg => {
                    if let Some(a) = stack.pop() {
                        stack.push(-a);
                    }
                }
                OpCode::Call(func) => {
                    if let Some(a) = stack.pop() {
                        stack.push(func.eval(a));
                    }
                }
                binary => {
                    let (Some(b), Some(a)) = (stack.pop(), stack.pop()) else {
                        return T::nan();
                    };
                    stack.push(match binary {
                        OpCode::Add => a + b,
                        OpCode::Sub => a - b,
                        OpCode::Mul => a * b,
                        OpCode::Div => a / b,
                        _ => a.powf(b),
                    });
                }
            }
        }

        stack.pop().unwrap_or_else(T::zero)
    }
}

// --- AST & Parser ---

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Binary(Box<Expr>, char, Box<Expr>),
    Neg(Box<Expr>),
    Call(String, Box<Expr>),
}

/// Resolves names against state variables first, then parameters.
pub struct Compiler {
    pub var_map: HashMap<String, usize>,
    pub param_map: HashMap<String, usize>,
}

impl Compiler {
    pub fn new(var_names: &[String], param_names: &[String]) -> Self {
        let index = |names: &[String]| {
            names
                .iter()
                .enumerate()
                .map(|(i, name)| (name.clone(), i))
                .collect::<HashMap<_, _>>()
        };
        Self {
            var_map: index(var_names),
            param_map: index(param_names),
        }
    }

    pub fn compile(&self, expr: &Expr) -> Result<Bytecode, EquationError> {
        let mut ops = Vec::new();
        self.compile_recursive(expr, &mut ops)?;
        Ok(Bytecode { ops })
    }

    /// Parses and compiles in one go.
    pub fn compile_str(&self, source: &str) -> Result<Bytecode, EquationError> {
        self.compile(&parse(source)?)
    }

    fn compile_recursive(&self, expr: &Expr, ops: &mut Vec<OpCode>) -> Result<(), EquationError> {
        match expr {
            Expr::Number(n) => ops.push(OpCode::LoadConst(*n)),
            Expr::Variable(name) => {
                if let Some(&idx) = self.var_map.get(name) {
                    ops.push(OpCode::LoadVar(idx));
                } else if let Some(&idx) = self.param_map.get(name) {
                    ops.push(OpCode::LoadParam(idx));
                } else if name == "pi" {
                    ops.push(OpCode::LoadConst(std::f64::consts::PI));
                } else {
                    return Err(EquationError::UnknownSymbol(name.clone()));
                }
            }
            Expr::Binary(left, op, right) => {
                self.compile_recursive(left, ops)?;
                self.compile_recursive(right, ops)?;
                ops.push(match op {
                    '+' => OpCode::Add,
                    '-' => OpCode::Sub,
                    '*' => OpCode::Mul,
                    '/' => OpCode::Div,
                    _ => OpCode::Pow,
                });
            }
            Expr::Neg(operand) => {
                self.compile_recursive(operand, ops)?;
                ops.push(OpCode::Neg);
            }
            Expr::Call(name, arg) => {
                let func = Function::from_name(name)
                    .ok_or_else(|| EquationError::UnknownFunction(name.clone()))?;
                self.compile_recursive(arg, ops)?;
                ops.push(OpCode::Call(func));
            }
        }
        Ok(())
    }
}

/// Parses a string expression into an AST.
pub fn parse(input: &str) -> Result<Expr, EquationError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_sum()?;
    if parser.pos < parser.tokens.len() {
        return Err(EquationError::TrailingInput(parser.pos));
    }
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Identifier(String),
    Op(char),
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, EquationError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() || c == '.' {
            let mut literal = String::new();
            while let Some(&d) = chars.peek() {
                let exponent_sign = (d == '-' || d == '+') && literal.ends_with(['e', 'E']);
                if d.is_ascii_digit() || d == '.' || d == 'e' || d == 'E' || exponent_sign {
                    literal.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            let value = literal
                .parse()
                .map_err(|_| EquationError::InvalidNumber(literal.clone()))?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() || c == '_' {
            let mut ident = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_alphanumeric() || d == '_' {
                    ident.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Identifier(ident));
        } else {
            match c {
                '+' | '-' | '*' | '/' | '^' => tokens.push(Token::Op(c)),
                '(' => tokens.push(Token::LParen),
                ')' => tokens.push(Token::RParen),
                _ => return Err(EquationError::UnexpectedToken(tokens.len())),
            }
            chars.next();
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn peek_op(&self, ops: &[char]) -> Option<char> {
        match self.peek() {
            Some(Token::Op(c)) if ops.contains(c) => Some(*c),
            _ => None,
        }
    }

    fn parse_sum(&mut self) -> Result<Expr, EquationError> {
        let mut left = self.parse_product()?;
        while let Some(op) = self.peek_op(&['+', '-']) {
            self.pos += 1;
            let right = self.parse_product()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_product(&mut self) -> Result<Expr, EquationError> {
        let mut left = self.parse_unary()?;
        while let Some(op) = self.peek_op(&['*', '/']) {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, EquationError> {
        if self.peek_op(&['-']).is_some() {
            self.pos += 1;
            return Ok(Expr::Neg(Box::new(self.parse_unary()?)));
        }
        if self.peek_op(&['+']).is_some() {
            self.pos += 1;
            return self.parse_unary();
        }
        self.parse_power()
    }

    // Right associative, binds tighter than unary minus: -x^2 == -(x^2).
    fn parse_power(&mut self) -> Result<Expr, EquationError> {
        let base = self.parse_primary()?;
        if self.peek_op(&['^']).is_some() {
            self.pos += 1;
            let exponent = self.parse_unary()?;
            return Ok(Expr::Binary(Box::new(base), '^', Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr, EquationError> {
        let start = self.pos;
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Identifier(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.pos += 1;
                    let arg = self.parse_sum()?;
                    self.expect_closing()?;
                    Ok(Expr::Call(name, Box::new(arg)))
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            Some(Token::LParen) => {
                let expr = self.parse_sum()?;
                self.expect_closing()?;
                Ok(expr)
            }
            _ => Err(EquationError::UnexpectedToken(start)),
        }
    }

    fn expect_closing(&mut self) -> Result<(), EquationError> {
        match self.next() {
            Some(Token::RParen) => Ok(()),
            _ => Err(EquationError::ExpectedClosingParen(self.pos)),
        }
    }
}

/// ODE right-hand side with one compiled expression per state variable.
pub struct EquationSystem<T: Scalar> {
    pub equations: Vec<Bytecode>,
    pub params: Vec<T>,
    pub var_names: Vec<String>,
    pub param_names: Vec<String>,
    // Scratch stack; makes the system !Sync.
    stack: RefCell<Vec<T>>,
}

impl<T: Scalar> EquationSystem<T> {
    pub fn new(equations: Vec<Bytecode>, params: Vec<T>) -> Self {
        let depth = equations.iter().map(Bytecode::stack_depth).max().unwrap_or(0);
        Self {
            equations,
            params,
            var_names: Vec::new(),
            param_names: Vec::new(),
            stack: RefCell::new(Vec::with_capacity(depth.max(8))),
        }
    }

    /// Compiles `equations[i]` as `d(var_names[i])/dt`.
    pub fn from_strings(
        equations: &[String],
        var_names: &[String],
        param_names: &[String],
        params: Vec<T>,
    ) -> Result<Self, EquationError> {
        let compiler = Compiler::new(var_names, param_names);
        let bytecodes = equations
            .iter()
            .map(|eq| compiler.compile_str(eq))
            .collect::<Result<Vec<_>, _>>()?;
        let mut system = Self::new(bytecodes, params);
        system.var_names = var_names.to_vec();
        system.param_names = param_names.to_vec();
        Ok(system)
    }

    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.param_names.iter().position(|p| p == name)
    }
}

impl<T: Scalar> DynamicalSystem<T> for EquationSystem<T> {
    fn dimension(&self) -> usize {
        self.equations.len()
    }

    fn apply(&self, _t: T, x: &[T], out: &mut [T]) {
        let mut stack = self.stack.borrow_mut();
        for (i, eq) in self.equations.iter().enumerate() {
            out[i] = VM::execute(eq, x, &self.params, &mut stack);
        }
    }
}

/// A single compiled expression evaluated pointwise over named coordinates.
#[derive(Debug, Clone)]
pub struct ScalarField {
    code: Bytecode,
    params: Vec<f64>,
}

impl ScalarField {
    pub fn compile(
        source: &str,
        coordinates: &[&str],
        param_names: &[&str],
        params: &[f64],
    ) -> Result<Self, EquationError> {
        let owned = |names: &[&str]| names.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let compiler = Compiler::new(&owned(coordinates), &owned(param_names));
        Ok(Self {
            code: compiler.compile_str(source)?,
            params: params.to_vec(),
        })
    }

    pub fn eval(&self, point: &[f64], stack: &mut Vec<f64>) -> f64 {
        VM::execute(&self.code, point, &self.params, stack)
    }

    /// Evaluates the field at every point of a flattened coordinate list.
    pub fn eval_points(&self, points: &[[f64; 3]], dims: usize) -> Vec<f64> {
        let mut stack = Vec::with_capacity(self.code.stack_depth().max(8));
        points
            .iter()
            .map(|p| self.eval(&p[..dims], &mut stack))
            .collect()
    }
}
