/*
 * topology-metricsd - asset-topology sensor assignment and composite-metric daemon
 * Copyright (c) 2026  Topology Metrics Daemon contributors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! The expression evaluator a [`crate::compute_worker::ComputeWorker`] runs
//! against its cached sensor readings. Treated as a pluggable capability
//! (the [`Evaluator`] trait) rather than an embedded general-purpose
//! scripting language: the only expressions [`crate::config_emitter`] ever
//! renders are of the shape `(topic, avg(mt) + offset, unit, 0)`, so a small
//! hand-rolled arithmetic DSL is sufficient and keeps the sandbox trivial —
//! no filesystem or network capability exists for an expression to reach.

use std::collections::HashMap;
use std::fmt;

use anyhow::{anyhow, bail, Result};

/// One element of an evaluator's result tuple.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalValue {
    Number(f64),
    Text(String),
}

impl fmt::Display for EvalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalValue::Number(n) => write!(f, "{n}"),
            EvalValue::Text(s) => write!(f, "{s:?}"),
        }
    }
}

/// Given a source string and an environment (topic -> last-known real
/// value among non-expired readings), returns a result tuple or an error.
/// The config files [`crate::config_emitter`] renders always produce a
/// four-element tuple; nothing in this trait's contract requires exactly
/// four, since the only consumer ([`crate::compute_worker::ComputeWorker`])
/// reads at most the first three and ignores the rest.
pub trait Evaluator {
    fn evaluate(&self, source: &str, env: &HashMap<String, f64>) -> Result<Vec<EvalValue>>;
}

/// The default, hand-rolled arithmetic DSL. Grammar:
///
/// ```text
/// tuple   := '(' item (',' item)* ')'
/// item    := string | expr
/// expr    := term (('+' | '-') term)*
/// term    := factor (('*' | '/') factor)*
/// factor  := number | 'avg' '(' 'mt' ')' | '(' expr ')'
/// string  := '"' [^"]* '"'
/// ```
///
/// `avg(mt)` is the arithmetic mean of every value currently in the
/// environment; an empty environment evaluates it to `0`, matching the
/// "a single non-expired reading is sufficient" freshness semantics (zero
/// readings is simply the degenerate case, not an error).
#[derive(Debug, Default, Clone, Copy)]
pub struct ArithmeticDsl;

impl Evaluator for ArithmeticDsl {
    fn evaluate(&self, source: &str, env: &HashMap<String, f64>) -> Result<Vec<EvalValue>> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            env,
        };
        let result = parser.parse_tuple()?;
        parser.expect_end()?;
        Ok(result)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Comma,
    Plus,
    Minus,
    Star,
    Slash,
    Number(f64),
    String(String),
    Ident(String),
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '"' => {
                let mut text = String::new();
                i += 1;
                while i < chars.len() && chars[i] != '"' {
                    text.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    bail!("unterminated string literal in expression {source:?}");
                }
                i += 1; // closing quote
                tokens.push(Token::String(text));
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = text
                    .parse::<f64>()
                    .map_err(|_| anyhow!("invalid number literal {text:?} in {source:?}"))?;
                tokens.push(Token::Number(number));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(Token::Ident(text));
            }
            other => bail!("unexpected character {other:?} in expression {source:?}"),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    env: &'a HashMap<String, f64>,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let tok = self.tokens.get(self.pos);
        self.pos += 1;
        tok
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        match self.advance() {
            Some(tok) if tok == expected => Ok(()),
            other => bail!("expected {expected:?}, found {other:?}"),
        }
    }

    fn expect_end(&self) -> Result<()> {
        if self.pos == self.tokens.len() {
            Ok(())
        } else {
            bail!("trailing tokens after expression: {:?}", &self.tokens[self.pos..])
        }
    }

    fn parse_tuple(&mut self) -> Result<Vec<EvalValue>> {
        self.expect(&Token::LParen)?;
        let mut items = vec![self.parse_item()?];
        while matches!(self.peek(), Some(Token::Comma)) {
            self.advance();
            items.push(self.parse_item()?);
        }
        self.expect(&Token::RParen)?;
        Ok(items)
    }

    fn parse_item(&mut self) -> Result<EvalValue> {
        if let Some(Token::String(text)) = self.peek() {
            let text = text.clone();
            self.advance();
            return Ok(EvalValue::Text(text));
        }
        Ok(EvalValue::Number(self.parse_expr()?))
    }

    fn parse_expr(&mut self) -> Result<f64> {
        let mut value = self.parse_term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.advance();
                    value += self.parse_term()?;
                }
                Some(Token::Minus) => {
                    self.advance();
                    value -= self.parse_term()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn parse_term(&mut self) -> Result<f64> {
        let mut value = self.parse_factor()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.advance();
                    value *= self.parse_factor()?;
                }
                Some(Token::Slash) => {
                    self.advance();
                    let divisor = self.parse_factor()?;
                    if divisor == 0.0 {
                        bail!("division by zero in expression");
                    }
                    value /= divisor;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn parse_factor(&mut self) -> Result<f64> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(*n),
            Some(Token::Minus) => Ok(-self.parse_factor()?),
            Some(Token::LParen) => {
                let value = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(value)
            }
            Some(Token::Ident(name)) if name == "avg" => {
                self.expect(&Token::LParen)?;
                match self.advance() {
                    Some(Token::Ident(arg)) if arg == "mt" => {}
                    other => bail!("avg() only supports the mt environment, found {other:?}"),
                }
                self.expect(&Token::RParen)?;
                Ok(average(self.env))
            }
            other => bail!("unexpected token in arithmetic expression: {other:?}"),
        }
    }
}

fn average(env: &HashMap<String, f64>) -> f64 {
    if env.is_empty() {
        return 0.0;
    }
    env.values().sum::<f64>() / env.len() as f64
}

/// Renders the source text [`crate::config_emitter`] writes into every
/// `.cfg` file: `(output_topic, avg(mt) + offset, unit, 0)`.
pub fn render_mean_expression(output_topic: &str, offset: f64, unit: &str) -> String {
    format!("(\"{output_topic}\", avg(mt) + {offset}, \"{unit}\", 0)")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn evaluates_mean_plus_offset() {
        let source = render_mean_expression("average.temperature@R1", 1.5, "C");
        let e = env(&[("temperature.TH1@R1", 40.0), ("temperature.TH2@R1", 60.0)]);
        let result = ArithmeticDsl.evaluate(&source, &e).unwrap();
        assert_eq!(result[0], EvalValue::Text("average.temperature@R1".into()));
        assert_eq!(result[1], EvalValue::Number(51.5));
        assert_eq!(result[2], EvalValue::Text("C".into()));
        assert_eq!(result[3], EvalValue::Number(0.0));
    }

    #[test]
    fn empty_environment_averages_to_zero() {
        let source = render_mean_expression("average.humidity@R1", 0.0, "%");
        let result = ArithmeticDsl.evaluate(&source, &HashMap::new()).unwrap();
        assert_eq!(result[1], EvalValue::Number(0.0));
    }

    #[test]
    fn rejects_garbage_expression() {
        let e = HashMap::new();
        assert!(ArithmeticDsl.evaluate("not an expression", &e).is_err());
    }
}
