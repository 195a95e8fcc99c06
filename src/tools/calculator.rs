//! 计算器工具：算术表达式求值（Pratt 解析）
//!
//! 支持 + - * / % ^（右结合）、一元负号、括号、常量 pi / e，
//! 以及 sqrt / sin / cos / tan / asin / acos / atan / ln / log / log2 / exp / abs / floor / ceil / round。

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::Tool;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Op(char),
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // 科学计数法 1e-3
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| format!("Invalid number: {text}"))?;
                tokens.push(Token::Num(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect::<String>().to_lowercase()));
            }
            '+' | '-' | '*' | '/' | '%' | '^' => {
                // ** 视为幂
                if c == '*' && chars.get(i + 1) == Some(&'*') {
                    tokens.push(Token::Op('^'));
                    i += 2;
                } else {
                    tokens.push(Token::Op(c));
                    i += 1;
                }
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            other => return Err(format!("Unexpected character '{other}'")),
        }
    }
    Ok(tokens)
}

/// 括号、函数调用、一元符号的最大嵌套层数
const MAX_DEPTH: usize = 256;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expect_rparen(&mut self) -> Result<(), String> {
        match self.next() {
            Some(Token::RParen) => Ok(()),
            _ => Err("Expected ')'".to_string()),
        }
    }

    fn infix_binding_power(op: char) -> (u8, u8) {
        match op {
            '+' | '-' => (1, 2),
            '*' | '/' | '%' => (3, 4),
            _ => (7, 6), // '^' 右结合
        }
    }

    const PREFIX_BP: u8 = 5;

    fn expr(&mut self, min_bp: u8) -> Result<f64, String> {
        if self.depth >= MAX_DEPTH {
            return Err("Expression nested too deeply".to_string());
        }
        self.depth += 1;
        let value = self.expr_inner(min_bp);
        self.depth -= 1;
        value
    }

    fn expr_inner(&mut self, min_bp: u8) -> Result<f64, String> {
        let mut lhs = match self.next() {
            Some(Token::Num(n)) => n,
            Some(Token::Op('-')) => -self.expr(Self::PREFIX_BP)?,
            Some(Token::Op('+')) => self.expr(Self::PREFIX_BP)?,
            Some(Token::LParen) => {
                let v = self.expr(0)?;
                self.expect_rparen()?;
                v
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    let arg = self.expr(0)?;
                    self.expect_rparen()?;
                    apply_function(&name, arg)?
                } else {
                    constant(&name)?
                }
            }
            Some(t) => return Err(format!("Unexpected token {t:?}")),
            None => return Err("Unexpected end of expression".to_string()),
        };

        loop {
            let op = match self.peek() {
                Some(Token::Op(op)) => *op,
                Some(Token::RParen) | None => break,
                Some(t) => return Err(format!("Unexpected token {t:?}")),
            };
            let (l_bp, r_bp) = Self::infix_binding_power(op);
            if l_bp < min_bp {
                break;
            }
            self.pos += 1;
            let rhs = self.expr(r_bp)?;
            lhs = match op {
                '+' => lhs + rhs,
                '-' => lhs - rhs,
                '*' => lhs * rhs,
                '/' => {
                    if rhs == 0.0 {
                        return Err("Division by zero".to_string());
                    }
                    lhs / rhs
                }
                '%' => {
                    if rhs == 0.0 {
                        return Err("Division by zero".to_string());
                    }
                    lhs % rhs
                }
                _ => lhs.powf(rhs),
            };
        }
        Ok(lhs)
    }
}

fn constant(name: &str) -> Result<f64, String> {
    match name {
        "pi" => Ok(std::f64::consts::PI),
        "e" => Ok(std::f64::consts::E),
        other => Err(format!("Unknown identifier '{other}'")),
    }
}

fn apply_function(name: &str, x: f64) -> Result<f64, String> {
    let v = match name {
        "sqrt" => x.sqrt(),
        "sin" => x.sin(),
        "cos" => x.cos(),
        "tan" => x.tan(),
        "asin" => x.asin(),
        "acos" => x.acos(),
        "atan" => x.atan(),
        "ln" => x.ln(),
        "log" | "log10" => x.log10(),
        "log2" => x.log2(),
        "exp" => x.exp(),
        "abs" => x.abs(),
        "floor" => x.floor(),
        "ceil" => x.ceil(),
        "round" => x.round(),
        other => return Err(format!("Unknown function '{other}'")),
    };
    Ok(v)
}

/// 求值表达式
pub fn evaluate(expression: &str) -> Result<f64, String> {
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err("Empty expression".to_string());
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr(0)?;
    if parser.pos < parser.tokens.len() {
        return Err("Unbalanced ')'".to_string());
    }
    if !value.is_finite() {
        return Err(format!("Result is not a finite number ({value})"));
    }
    Ok(value)
}

fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression, e.g. \"(3 + 4) * 2^3\" or \"sqrt(2) * pi\". Args: {\"expression\": \"...\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "expression": { "type": "string", "minLength": 1 } },
            "required": ["expression"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let expr = args["expression"].as_str().unwrap_or("");
        evaluate(expr).map(format_number)
    }
}
