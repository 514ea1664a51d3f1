//! XPath 1.0 expressions: lexer, recursive-descent parser and AST.
//!
//! Covers what stylesheets for flat record exports use: location paths on
//! every axis, predicates, the full operator table, variables and the core
//! function library (evaluated in [`super::eval`]).

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    Parent,
    Ancestor,
    AncestorOrSelf,
    Attribute,
    SelfAxis,
    FollowingSibling,
    PrecedingSibling,
    Following,
    Preceding,
}

impl Axis {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "child" => Self::Child,
            "descendant" => Self::Descendant,
            "descendant-or-self" => Self::DescendantOrSelf,
            "parent" => Self::Parent,
            "ancestor" => Self::Ancestor,
            "ancestor-or-self" => Self::AncestorOrSelf,
            "attribute" => Self::Attribute,
            "self" => Self::SelfAxis,
            "following-sibling" => Self::FollowingSibling,
            "preceding-sibling" => Self::PrecedingSibling,
            "following" => Self::Following,
            "preceding" => Self::Preceding,
            _ => return None,
        })
    }

    /// Reverse axes number their proximity positions backwards.
    pub fn is_reverse(self) -> bool {
        matches!(
            self,
            Self::Parent | Self::Ancestor | Self::AncestorOrSelf | Self::PrecedingSibling | Self::Preceding
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeTest {
    Name(String),
    /// `prefix:*`
    PrefixWildcard(String),
    Wildcard,
    Node,
    Text,
    Comment,
    ProcessingInstruction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub axis: Axis,
    pub test: NodeTest,
    pub predicates: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PathStart {
    Root,
    Context,
    Expr(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocationPath {
    pub start: PathStart,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
    Arith(ArithOp, Box<Expr>, Box<Expr>),
    Negate(Box<Expr>),
    Union(Box<Expr>, Box<Expr>),
    Literal(String),
    Number(f64),
    Variable(String),
    Function(String, Vec<Expr>),
    Filter(Box<Expr>, Vec<Expr>),
    Path(LocationPath),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxError {
    pub expression: String,
    pub message: String,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid expression `{}`: {}", self.expression, self.message)
    }
}

impl std::error::Error for SyntaxError {}

pub fn parse(expression: &str) -> Result<Expr, SyntaxError> {
    let fail = |message: String| SyntaxError {
        expression: expression.to_string(),
        message,
    };
    let tokens = tokenize(expression).map_err(fail)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expr().map_err(fail)?;
    if let Some(token) = parser.peek() {
        return Err(fail(format!("unexpected {token:?}")));
    }
    Ok(expr)
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Slash,
    DoubleSlash,
    Pipe,
    Plus,
    Minus,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    DotDot,
    At,
    Comma,
    ColonColon,
    Multiply,
    And,
    Or,
    Div,
    Mod,
    /// QName, `*` or `prefix:*` in name-test position.
    Name(String),
    Literal(String),
    Number(f64),
    Variable(String),
}

impl Token {
    /// Whether `*` and operator names after this token are operators.
    fn ends_operand(&self) -> bool {
        !matches!(
            self,
            Token::At
                | Token::ColonColon
                | Token::LParen
                | Token::LBracket
                | Token::Comma
                | Token::Slash
                | Token::DoubleSlash
                | Token::Pipe
                | Token::Plus
                | Token::Minus
                | Token::Eq
                | Token::NotEq
                | Token::Lt
                | Token::Le
                | Token::Gt
                | Token::Ge
                | Token::Multiply
                | Token::And
                | Token::Or
                | Token::Div
                | Token::Mod
        )
    }
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.')
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens: Vec<Token> = Vec::new();
    let mut i = 0;

    let read_ncname = |i: &mut usize| -> String {
        let start = *i;
        while *i < chars.len() && is_name_char(chars[*i]) {
            *i += 1;
        }
        chars[start..*i].iter().collect()
    };

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        let operator_context = tokens.last().is_some_and(Token::ends_operand);
        let token = match c {
            ' ' | '\t' | '\n' | '\r' => {
                i += 1;
                continue;
            }
            '/' if next == Some('/') => {
                i += 2;
                Token::DoubleSlash
            }
            '/' => {
                i += 1;
                Token::Slash
            }
            '|' => {
                i += 1;
                Token::Pipe
            }
            '+' => {
                i += 1;
                Token::Plus
            }
            '-' => {
                i += 1;
                Token::Minus
            }
            '=' => {
                i += 1;
                Token::Eq
            }
            '!' if next == Some('=') => {
                i += 2;
                Token::NotEq
            }
            '<' if next == Some('=') => {
                i += 2;
                Token::Le
            }
            '<' => {
                i += 1;
                Token::Lt
            }
            '>' if next == Some('=') => {
                i += 2;
                Token::Ge
            }
            '>' => {
                i += 1;
                Token::Gt
            }
            '(' => {
                i += 1;
                Token::LParen
            }
            ')' => {
                i += 1;
                Token::RParen
            }
            '[' => {
                i += 1;
                Token::LBracket
            }
            ']' => {
                i += 1;
                Token::RBracket
            }
            ',' => {
                i += 1;
                Token::Comma
            }
            '@' => {
                i += 1;
                Token::At
            }
            ':' if next == Some(':') => {
                i += 2;
                Token::ColonColon
            }
            '.' if next == Some('.') => {
                i += 2;
                Token::DotDot
            }
            '.' if next.is_some_and(|n| n.is_ascii_digit()) => {
                let start = i;
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                Token::Number(text.parse().map_err(|_| format!("bad number {text}"))?)
            }
            '.' => {
                i += 1;
                Token::Dot
            }
            '"' | '\'' => {
                let start = i + 1;
                let end = chars[start..]
                    .iter()
                    .position(|&ch| ch == c)
                    .map(|p| start + p)
                    .ok_or_else(|| "unterminated string literal".to_string())?;
                i = end + 1;
                Token::Literal(chars[start..end].iter().collect())
            }
            '$' => {
                i += 1;
                if i >= chars.len() || !is_name_start(chars[i]) {
                    return Err("expected a variable name after `$`".to_string());
                }
                let mut name = read_ncname(&mut i);
                if i + 1 < chars.len() && chars[i] == ':' && chars[i + 1] != ':' {
                    i += 1;
                    name.push(':');
                    name.push_str(&read_ncname(&mut i));
                }
                Token::Variable(name)
            }
            '*' if operator_context => {
                i += 1;
                Token::Multiply
            }
            '*' => {
                i += 1;
                Token::Name("*".to_string())
            }
            d if d.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                if i < chars.len() && chars[i] == '.' {
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                Token::Number(text.parse().map_err(|_| format!("bad number {text}"))?)
            }
            n if is_name_start(n) => {
                let mut name = read_ncname(&mut i);
                if operator_context {
                    match name.as_str() {
                        "and" => Token::And,
                        "or" => Token::Or,
                        "div" => Token::Div,
                        "mod" => Token::Mod,
                        _ => return Err(format!("unexpected name `{name}`")),
                    }
                } else {
                    if i + 1 < chars.len() && chars[i] == ':' && chars[i + 1] != ':' {
                        i += 1;
                        name.push(':');
                        if chars[i] == '*' {
                            i += 1;
                            name.push('*');
                        } else {
                            name.push_str(&read_ncname(&mut i));
                        }
                    }
                    Token::Name(name)
                }
            }
            other => return Err(format!("unexpected character `{other}`")),
        };
        tokens.push(token);
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

const NODE_TYPES: &[&str] = &["node", "text", "comment", "processing-instruction"];

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

type ParseResult<T> = Result<T, String>;

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> ParseResult<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(format!("expected {token:?}, found {:?}", self.peek()))
        }
    }

    fn expr(&mut self) -> ParseResult<Expr> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> ParseResult<Expr> {
        let mut left = self.and_expr()?;
        while self.eat(&Token::Or) {
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> ParseResult<Expr> {
        let mut left = self.equality_expr()?;
        while self.eat(&Token::And) {
            let right = self.equality_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn equality_expr(&mut self) -> ParseResult<Expr> {
        let mut left = self.relational_expr()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => CompareOp::Eq,
                Some(Token::NotEq) => CompareOp::NotEq,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.relational_expr()?;
            left = Expr::Compare(op, Box::new(left), Box::new(right));
        }
    }

    fn relational_expr(&mut self) -> ParseResult<Expr> {
        let mut left = self.additive_expr()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => CompareOp::Lt,
                Some(Token::Le) => CompareOp::Le,
                Some(Token::Gt) => CompareOp::Gt,
                Some(Token::Ge) => CompareOp::Ge,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.additive_expr()?;
            left = Expr::Compare(op, Box::new(left), Box::new(right));
        }
    }

    fn additive_expr(&mut self) -> ParseResult<Expr> {
        let mut left = self.multiplicative_expr()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => ArithOp::Add,
                Some(Token::Minus) => ArithOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.multiplicative_expr()?;
            left = Expr::Arith(op, Box::new(left), Box::new(right));
        }
    }

    fn multiplicative_expr(&mut self) -> ParseResult<Expr> {
        let mut left = self.unary_expr()?;
        loop {
            let op = match self.peek() {
                Some(Token::Multiply) => ArithOp::Mul,
                Some(Token::Div) => ArithOp::Div,
                Some(Token::Mod) => ArithOp::Mod,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.unary_expr()?;
            left = Expr::Arith(op, Box::new(left), Box::new(right));
        }
    }

    fn unary_expr(&mut self) -> ParseResult<Expr> {
        if self.eat(&Token::Minus) {
            let inner = self.unary_expr()?;
            return Ok(Expr::Negate(Box::new(inner)));
        }
        self.union_expr()
    }

    fn union_expr(&mut self) -> ParseResult<Expr> {
        let mut left = self.path_expr()?;
        while self.eat(&Token::Pipe) {
            let right = self.path_expr()?;
            left = Expr::Union(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn starts_primary(&self) -> bool {
        match self.peek() {
            Some(Token::Variable(_) | Token::LParen | Token::Literal(_) | Token::Number(_)) => true,
            Some(Token::Name(name)) => {
                self.peek_at(1) == Some(&Token::LParen) && !NODE_TYPES.contains(&name.as_str())
            }
            _ => false,
        }
    }

    fn starts_step(&self) -> bool {
        matches!(
            self.peek(),
            Some(Token::Dot | Token::DotDot | Token::At | Token::Name(_))
        )
    }

    fn path_expr(&mut self) -> ParseResult<Expr> {
        if self.starts_primary() {
            let primary = self.primary_expr()?;
            let mut predicates = Vec::new();
            while self.peek() == Some(&Token::LBracket) {
                predicates.push(self.predicate()?);
            }
            let filtered = if predicates.is_empty() {
                primary
            } else {
                Expr::Filter(Box::new(primary), predicates)
            };
            let mut steps = Vec::new();
            match self.peek() {
                Some(Token::Slash) => {
                    self.pos += 1;
                    self.relative_path(&mut steps)?;
                }
                Some(Token::DoubleSlash) => {
                    self.pos += 1;
                    steps.push(descendant_or_self());
                    self.relative_path(&mut steps)?;
                }
                _ => return Ok(filtered),
            }
            return Ok(Expr::Path(LocationPath {
                start: PathStart::Expr(Box::new(filtered)),
                steps,
            }));
        }
        self.location_path()
    }

    fn location_path(&mut self) -> ParseResult<Expr> {
        let mut steps = Vec::new();
        let start = match self.peek() {
            Some(Token::Slash) => {
                self.pos += 1;
                if self.starts_step() {
                    self.relative_path(&mut steps)?;
                }
                PathStart::Root
            }
            Some(Token::DoubleSlash) => {
                self.pos += 1;
                steps.push(descendant_or_self());
                self.relative_path(&mut steps)?;
                PathStart::Root
            }
            _ => {
                self.relative_path(&mut steps)?;
                PathStart::Context
            }
        };
        Ok(Expr::Path(LocationPath { start, steps }))
    }

    fn relative_path(&mut self, steps: &mut Vec<Step>) -> ParseResult<()> {
        steps.push(self.step()?);
        loop {
            match self.peek() {
                Some(Token::Slash) => {
                    self.pos += 1;
                    steps.push(self.step()?);
                }
                Some(Token::DoubleSlash) => {
                    self.pos += 1;
                    steps.push(descendant_or_self());
                    steps.push(self.step()?);
                }
                _ => return Ok(()),
            }
        }
    }

    fn step(&mut self) -> ParseResult<Step> {
        if self.eat(&Token::Dot) {
            return Ok(Step {
                axis: Axis::SelfAxis,
                test: NodeTest::Node,
                predicates: Vec::new(),
            });
        }
        if self.eat(&Token::DotDot) {
            return Ok(Step {
                axis: Axis::Parent,
                test: NodeTest::Node,
                predicates: Vec::new(),
            });
        }

        let axis = if self.eat(&Token::At) {
            Axis::Attribute
        } else if let (Some(Token::Name(name)), Some(Token::ColonColon)) = (self.peek(), self.peek_at(1)) {
            let axis = Axis::from_name(name).ok_or_else(|| format!("unknown axis `{name}`"))?;
            self.pos += 2;
            axis
        } else {
            Axis::Child
        };

        let test = self.node_test()?;
        let mut predicates = Vec::new();
        while self.peek() == Some(&Token::LBracket) {
            predicates.push(self.predicate()?);
        }
        Ok(Step { axis, test, predicates })
    }

    fn node_test(&mut self) -> ParseResult<NodeTest> {
        let name = match self.advance() {
            Some(Token::Name(name)) => name,
            other => return Err(format!("expected a node test, found {other:?}")),
        };
        if self.peek() == Some(&Token::LParen) && NODE_TYPES.contains(&name.as_str()) {
            self.pos += 1;
            if name == "processing-instruction" {
                if let Some(Token::Literal(_)) = self.peek() {
                    self.pos += 1;
                }
            }
            self.expect(&Token::RParen)?;
            return Ok(match name.as_str() {
                "node" => NodeTest::Node,
                "text" => NodeTest::Text,
                "comment" => NodeTest::Comment,
                _ => NodeTest::ProcessingInstruction,
            });
        }
        if name == "*" {
            return Ok(NodeTest::Wildcard);
        }
        if let Some(prefix) = name.strip_suffix(":*") {
            return Ok(NodeTest::PrefixWildcard(prefix.to_string()));
        }
        Ok(NodeTest::Name(name))
    }

    fn predicate(&mut self) -> ParseResult<Expr> {
        self.expect(&Token::LBracket)?;
        let expr = self.expr()?;
        self.expect(&Token::RBracket)?;
        Ok(expr)
    }

    fn primary_expr(&mut self) -> ParseResult<Expr> {
        match self.advance() {
            Some(Token::Variable(name)) => Ok(Expr::Variable(name)),
            Some(Token::Literal(text)) => Ok(Expr::Literal(text)),
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Name(name)) => {
                self.expect(&Token::LParen)?;
                let mut args = Vec::new();
                if !self.eat(&Token::RParen) {
                    loop {
                        args.push(self.expr()?);
                        if self.eat(&Token::RParen) {
                            break;
                        }
                        self.expect(&Token::Comma)?;
                    }
                }
                Ok(Expr::Function(name, args))
            }
            other => Err(format!("unexpected {other:?}")),
        }
    }
}

fn descendant_or_self() -> Step {
    Step {
        axis: Axis::DescendantOrSelf,
        test: NodeTest::Node,
        predicates: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child(name: &str) -> Step {
        Step {
            axis: Axis::Child,
            test: NodeTest::Name(name.to_string()),
            predicates: Vec::new(),
        }
    }

    #[test]
    fn test_relative_and_absolute_paths() {
        assert_eq!(
            parse("entries/entry").unwrap(),
            Expr::Path(LocationPath {
                start: PathStart::Context,
                steps: vec![child("entries"), child("entry")],
            })
        );
        assert_eq!(
            parse("/").unwrap(),
            Expr::Path(LocationPath {
                start: PathStart::Root,
                steps: vec![],
            })
        );
        let Expr::Path(path) = parse("//entry").unwrap() else {
            panic!("expected a path");
        };
        assert_eq!(path.start, PathStart::Root);
        assert_eq!(path.steps, vec![descendant_or_self(), child("entry")]);
    }

    #[test]
    fn test_attribute_and_axis_steps() {
        let Expr::Path(path) = parse("@date").unwrap() else {
            panic!("expected a path");
        };
        assert_eq!(path.steps[0].axis, Axis::Attribute);
        assert_eq!(path.steps[0].test, NodeTest::Name("date".to_string()));

        let Expr::Path(path) = parse("ancestor-or-self::*[1]").unwrap() else {
            panic!("expected a path");
        };
        assert_eq!(path.steps[0].axis, Axis::AncestorOrSelf);
        assert_eq!(path.steps[0].test, NodeTest::Wildcard);
        assert_eq!(path.steps[0].predicates, vec![Expr::Number(1.0)]);
    }

    #[test]
    fn test_star_is_multiply_after_an_operand() {
        assert_eq!(
            parse("2 * 3").unwrap(),
            Expr::Arith(ArithOp::Mul, Box::new(Expr::Number(2.0)), Box::new(Expr::Number(3.0)))
        );
        let Expr::Path(path) = parse("*").unwrap() else {
            panic!("expected a path");
        };
        assert_eq!(path.steps[0].test, NodeTest::Wildcard);
    }

    #[test]
    fn test_operator_names_versus_element_names() {
        let expr = parse("div div mod").unwrap();
        let Expr::Arith(ArithOp::Div, left, right) = expr else {
            panic!("expected div");
        };
        assert!(matches!(*left, Expr::Path(_)));
        assert!(matches!(*right, Expr::Path(_)));
        assert!(matches!(parse("a and b or c").unwrap(), Expr::Or(_, _)));
    }

    #[test]
    fn test_function_calls_and_node_type_tests() {
        assert_eq!(
            parse("concat('a', \"b\")").unwrap(),
            Expr::Function(
                "concat".to_string(),
                vec![Expr::Literal("a".to_string()), Expr::Literal("b".to_string())]
            )
        );
        let Expr::Path(path) = parse("text()").unwrap() else {
            panic!("expected a path");
        };
        assert_eq!(path.steps[0].test, NodeTest::Text);
    }

    #[test]
    fn test_filter_expression_with_path() {
        let Expr::Path(path) = parse("$rows[2]/@id").unwrap() else {
            panic!("expected a path");
        };
        assert!(matches!(path.start, PathStart::Expr(_)));
        assert_eq!(path.steps[0].axis, Axis::Attribute);
    }

    #[test]
    fn test_precedence() {
        let expr = parse("1 + 2 * 3 = 7 and not(false())").unwrap();
        assert!(matches!(expr, Expr::And(_, _)));
        assert!(matches!(parse("-a | b").unwrap(), Expr::Negate(_)));
        assert!(matches!(parse("a | b").unwrap(), Expr::Union(_, _)));
    }

    #[test]
    fn test_numbers_and_prefixed_names() {
        assert_eq!(parse(".5").unwrap(), Expr::Number(0.5));
        assert_eq!(parse("10.25").unwrap(), Expr::Number(10.25));
        let Expr::Path(path) = parse("m:entry/m:*").unwrap() else {
            panic!("expected a path");
        };
        assert_eq!(path.steps[0].test, NodeTest::Name("m:entry".to_string()));
        assert_eq!(path.steps[1].test, NodeTest::PrefixWildcard("m".to_string()));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(parse("").is_err());
        assert!(parse("entry[").is_err());
        assert!(parse("'unterminated").is_err());
        assert!(parse("bogus::entry").is_err());
        assert!(parse("a b").is_err());
        assert!(parse("concat(1,").is_err());
    }
}
