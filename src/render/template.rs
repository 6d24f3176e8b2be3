//! Template parsing
//!
//! Template bodies use three delimiter pairs, chosen so that the outer
//! Ansible/Jinja layer (`{{ var }}`) passes through untouched:
//!
//! | Delimiter | Meaning |
//! |-----------|---------|
//! | `{{{ expr }}}` | macro call-site or placeholder |
//! | `{{% if/elif/else/endif %}}` | conditional block |
//! | `{{# ... #}}` | comment |
//!
//! A tag alone on its line is *standalone*: block and comment tags take their
//! whole line with them, and an expression's output is indented to the tag's
//! column (or the line vanishes when the output is empty).

use crate::value::Value;

use super::error::RenderError;

/// A parsed template
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    nodes: Vec<Node>,
}

impl Template {
    /// Parse a template body; `name` identifies it in errors
    pub fn parse(name: impl Into<String>, source: &str) -> Result<Self, RenderError> {
        let name = name.into();
        let pieces = split_pieces(&name, source)?;
        let nodes = build_tree(&name, pieces)?;
        Ok(Self { name, nodes })
    }

    /// Name used in errors
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Names of every macro called, in order of appearance
    pub fn macro_calls(&self) -> Vec<String> {
        let mut out = Vec::new();
        collect_calls(&self.nodes, &mut out);
        out
    }
}

fn collect_calls(nodes: &[Node], out: &mut Vec<String>) {
    for node in nodes {
        match node {
            Node::Text(_) => {}
            Node::Output { expr, .. } => expr.collect_calls(out),
            Node::If { branches, otherwise } => {
                for (_, body) in branches {
                    collect_calls(body, out);
                }
                collect_calls(otherwise, out);
            }
        }
    }
}

/// Template tree node
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    Text(String),
    Output {
        expr: Expr,
        /// Indentation of a standalone tag
        indent: Option<String>,
        line: usize,
    },
    If {
        branches: Vec<(Condition, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
}

/// Expression inside `{{{ }}}` or a condition
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Value),
    Var(String),
    List(Vec<Expr>),
    Call { name: String, args: Vec<Arg> },
    Concat(Vec<Expr>),
    Filter { expr: Box<Expr>, filter: String },
}

impl Expr {
    fn collect_calls(&self, out: &mut Vec<String>) {
        match self {
            Expr::Call { name, args } => {
                out.push(name.clone());
                for arg in args {
                    arg.value.collect_calls(out);
                }
            }
            Expr::List(items) | Expr::Concat(items) => items.iter().for_each(|e| e.collect_calls(out)),
            Expr::Filter { expr, .. } => expr.collect_calls(out),
            Expr::Literal(_) | Expr::Var(_) => {}
        }
    }
}

/// Macro argument, positional or named
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Arg {
    pub name: Option<String>,
    pub value: Expr,
}

/// Condition of an `if`/`elif` block
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Condition {
    Truthy(Expr),
    Not(Box<Condition>),
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
    Compare { lhs: Expr, op: CompareOp, rhs: Expr },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompareOp {
    Eq,
    Ne,
    In,
    NotIn,
}

// ============================================================================
// Tag splitting
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagKind {
    Expr,
    Block,
    Comment,
}

impl TagKind {
    fn closer(&self) -> &'static str {
        match self {
            Self::Expr => "}}}",
            Self::Block => "%}}",
            Self::Comment => "#}}",
        }
    }
}

#[derive(Debug)]
enum Piece {
    Text(String),
    Tag {
        kind: TagKind,
        body: String,
        line: usize,
        indent: Option<String>,
    },
}

fn next_opener(source: &str, from: usize) -> Option<(usize, TagKind)> {
    [("{{{", TagKind::Expr), ("{{%", TagKind::Block), ("{{#", TagKind::Comment)]
        .iter()
        .filter_map(|(open, kind)| source[from..].find(open).map(|i| (from + i, *kind)))
        .min_by_key(|(i, _)| *i)
}

fn line_of(source: &str, idx: usize) -> usize {
    source[..idx].matches('\n').count() + 1
}

fn split_pieces(name: &str, source: &str) -> Result<Vec<Piece>, RenderError> {
    let mut pieces = Vec::new();
    let mut pos = 0;

    while let Some((start, kind)) = next_opener(source, pos) {
        let line = line_of(source, start);
        let body_start = start + 3;
        let close = source[body_start..]
            .find(kind.closer())
            .map(|i| body_start + i)
            .ok_or_else(|| RenderError::Syntax {
                template: name.to_string(),
                line,
                message: format!("unterminated tag, expected '{}'", kind.closer()),
            })?;
        let end = close + 3;
        let body = source[body_start..close].trim().trim_matches('-').trim().to_string();

        let line_start = source[..start].rfind('\n').map(|i| i + 1).unwrap_or(0);
        let before = &source[line_start..start];
        let rest = &source[end..];
        let rest_line = rest.find('\n').map(|i| &rest[..i]).unwrap_or(rest);
        let standalone = line_start >= pos
            && before.chars().all(|c| c == ' ' || c == '\t')
            && rest_line.trim_matches(|c| c == ' ' || c == '\t' || c == '\r').is_empty();

        if standalone {
            if line_start > pos {
                pieces.push(Piece::Text(source[pos..line_start].to_string()));
            }
            pieces.push(Piece::Tag {
                kind,
                body,
                line,
                indent: Some(before.to_string()),
            });
            pos = (end + rest_line.len() + 1).min(source.len());
        } else {
            if start > pos {
                pieces.push(Piece::Text(source[pos..start].to_string()));
            }
            pieces.push(Piece::Tag {
                kind,
                body,
                line,
                indent: None,
            });
            pos = end;
        }
    }

    if pos < source.len() {
        pieces.push(Piece::Text(source[pos..].to_string()));
    }
    Ok(pieces)
}

// ============================================================================
// Block structure
// ============================================================================

struct Frame {
    line: usize,
    branches: Vec<(Condition, Vec<Node>)>,
    otherwise: Option<Vec<Node>>,
}

impl Frame {
    fn sink(&mut self) -> Option<&mut Vec<Node>> {
        match self.otherwise {
            Some(ref mut otherwise) => Some(otherwise),
            None => self.branches.last_mut().map(|(_, body)| body),
        }
    }
}

fn build_tree(name: &str, pieces: Vec<Piece>) -> Result<Vec<Node>, RenderError> {
    let mut root = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();

    let syntax = |line: usize, message: String| RenderError::Syntax {
        template: name.to_string(),
        line,
        message,
    };

    for piece in pieces {
        match piece {
            Piece::Text(text) => push_node(&mut root, &mut stack, Node::Text(text)),
            Piece::Tag {
                kind: TagKind::Comment, ..
            } => {}
            Piece::Tag {
                kind: TagKind::Expr,
                body,
                line,
                indent,
            } => {
                let expr = Parser::new(name, &body, line)?.parse_expr_complete()?;
                push_node(&mut root, &mut stack, Node::Output { expr, indent, line });
            }
            Piece::Tag {
                kind: TagKind::Block,
                body,
                line,
                ..
            } => {
                let (keyword, rest) = match body.split_once(char::is_whitespace) {
                    Some((k, r)) => (k, r.trim()),
                    None => (body.as_str(), ""),
                };
                match keyword {
                    "if" => {
                        let cond = Parser::new(name, rest, line)?.parse_condition_complete()?;
                        stack.push(Frame {
                            line,
                            branches: vec![(cond, Vec::new())],
                            otherwise: None,
                        });
                    }
                    "elif" => {
                        let cond = Parser::new(name, rest, line)?.parse_condition_complete()?;
                        let frame = stack
                            .last_mut()
                            .ok_or_else(|| syntax(line, "'elif' outside of 'if'".to_string()))?;
                        if frame.otherwise.is_some() {
                            return Err(syntax(line, "'elif' after 'else'".to_string()));
                        }
                        frame.branches.push((cond, Vec::new()));
                    }
                    "else" => {
                        let frame = stack
                            .last_mut()
                            .ok_or_else(|| syntax(line, "'else' outside of 'if'".to_string()))?;
                        if frame.otherwise.is_some() {
                            return Err(syntax(line, "duplicate 'else'".to_string()));
                        }
                        frame.otherwise = Some(Vec::new());
                    }
                    "endif" => {
                        let frame = stack
                            .pop()
                            .ok_or_else(|| syntax(line, "'endif' without 'if'".to_string()))?;
                        let node = Node::If {
                            branches: frame.branches,
                            otherwise: frame.otherwise.unwrap_or_default(),
                        };
                        push_node(&mut root, &mut stack, node);
                    }
                    other => return Err(syntax(line, format!("unsupported block tag '{}'", other))),
                }
            }
        }
    }

    if let Some(frame) = stack.last() {
        return Err(syntax(frame.line, "'if' is never closed with 'endif'".to_string()));
    }
    Ok(root)
}

fn push_node(root: &mut Vec<Node>, stack: &mut [Frame], node: Node) {
    // Frames are created with their first branch, so a frame always has a sink
    match stack.last_mut().and_then(Frame::sink) {
        Some(sink) => sink.push(node),
        None => root.push(node),
    }
}

// ============================================================================
// Expression parsing
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Str(String),
    Int(i64),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Assign,
    EqEq,
    NotEq,
    Tilde,
    Pipe,
}

fn tokenize(src: &str) -> Result<Vec<Tok>, String> {
    let chars: Vec<char> = src.chars().collect();
    let mut toks = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                toks.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                toks.push(Tok::RParen);
                i += 1;
            }
            '[' => {
                toks.push(Tok::LBracket);
                i += 1;
            }
            ']' => {
                toks.push(Tok::RBracket);
                i += 1;
            }
            ',' => {
                toks.push(Tok::Comma);
                i += 1;
            }
            '~' => {
                toks.push(Tok::Tilde);
                i += 1;
            }
            '|' => {
                toks.push(Tok::Pipe);
                i += 1;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                toks.push(Tok::EqEq);
                i += 2;
            }
            '=' => {
                toks.push(Tok::Assign);
                i += 1;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                toks.push(Tok::NotEq);
                i += 2;
            }
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err("unterminated string literal".to_string()),
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            match chars.get(i + 1) {
                                Some(&n) if n == quote || n == '\\' => s.push(n),
                                Some('n') => s.push('\n'),
                                Some('t') => s.push('\t'),
                                Some(&n) => {
                                    s.push('\\');
                                    s.push(n);
                                }
                                None => return Err("unterminated string literal".to_string()),
                            }
                            i += 2;
                        }
                        Some(&ch) => {
                            s.push(ch);
                            i += 1;
                        }
                    }
                }
                toks.push(Tok::Str(s));
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).map_or(false, |n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while chars.get(i).map_or(false, |n| n.is_ascii_digit()) {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text.parse::<i64>().map_err(|e| format!("bad integer '{}': {}", text, e))?;
                toks.push(Tok::Int(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while chars
                    .get(i)
                    .map_or(false, |n| n.is_alphanumeric() || *n == '_' || *n == '.')
                {
                    i += 1;
                }
                toks.push(Tok::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(format!("unexpected character '{}'", other)),
        }
    }

    Ok(toks)
}

struct Parser<'a> {
    template: &'a str,
    line: usize,
    toks: Vec<Tok>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(template: &'a str, src: &str, line: usize) -> Result<Self, RenderError> {
        let toks = tokenize(src).map_err(|message| RenderError::Syntax {
            template: template.to_string(),
            line,
            message,
        })?;
        Ok(Self {
            template,
            line,
            toks,
            pos: 0,
        })
    }

    fn error(&self, message: impl Into<String>) -> RenderError {
        RenderError::Syntax {
            template: self.template.to_string(),
            line: self.line,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Tok> {
        self.toks.get(self.pos + offset)
    }

    fn next(&mut self) -> Option<Tok> {
        let tok = self.toks.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if matches!(self.peek(), Some(Tok::Ident(s)) if s == kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Tok) -> Result<(), RenderError> {
        if self.eat(&tok) {
            Ok(())
        } else {
            Err(self.error(format!("expected {:?}, found {:?}", tok, self.peek())))
        }
    }

    fn finish(&self) -> Result<(), RenderError> {
        match self.peek() {
            None => Ok(()),
            Some(tok) => Err(self.error(format!("unexpected trailing {:?}", tok))),
        }
    }

    fn parse_expr_complete(mut self) -> Result<Expr, RenderError> {
        if self.toks.is_empty() {
            return Err(self.error("empty expression"));
        }
        let expr = self.parse_expr()?;
        self.finish()?;
        Ok(expr)
    }

    fn parse_condition_complete(mut self) -> Result<Condition, RenderError> {
        if self.toks.is_empty() {
            return Err(self.error("empty condition"));
        }
        let cond = self.parse_or()?;
        self.finish()?;
        Ok(cond)
    }

    fn parse_expr(&mut self) -> Result<Expr, RenderError> {
        let mut expr = self.parse_concat()?;
        while self.eat(&Tok::Pipe) {
            match self.next() {
                Some(Tok::Ident(filter)) => {
                    expr = Expr::Filter {
                        expr: Box::new(expr),
                        filter,
                    }
                }
                other => return Err(self.error(format!("expected filter name, found {:?}", other))),
            }
        }
        Ok(expr)
    }

    fn parse_concat(&mut self) -> Result<Expr, RenderError> {
        let first = self.parse_primary()?;
        if self.peek() != Some(&Tok::Tilde) {
            return Ok(first);
        }
        let mut parts = vec![first];
        while self.eat(&Tok::Tilde) {
            parts.push(self.parse_primary()?);
        }
        Ok(Expr::Concat(parts))
    }

    fn parse_primary(&mut self) -> Result<Expr, RenderError> {
        match self.next() {
            Some(Tok::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Tok::Int(n)) => Ok(Expr::Literal(Value::Integer(n))),
            Some(Tok::LBracket) => {
                let mut items = Vec::new();
                if !self.eat(&Tok::RBracket) {
                    loop {
                        items.push(self.parse_expr()?);
                        if self.eat(&Tok::Comma) {
                            if self.eat(&Tok::RBracket) {
                                break;
                            }
                            continue;
                        }
                        self.expect(Tok::RBracket)?;
                        break;
                    }
                }
                Ok(Expr::List(items))
            }
            Some(Tok::LParen) => {
                let inner = self.parse_expr()?;
                self.expect(Tok::RParen)?;
                Ok(inner)
            }
            Some(Tok::Ident(name)) => match name.as_str() {
                "true" | "True" => Ok(Expr::Literal(Value::Boolean(true))),
                "false" | "False" => Ok(Expr::Literal(Value::Boolean(false))),
                _ if self.peek() == Some(&Tok::LParen) => {
                    self.pos += 1;
                    let args = self.parse_args()?;
                    Ok(Expr::Call { name, args })
                }
                _ => Ok(Expr::Var(name)),
            },
            other => Err(self.error(format!("expected a value, found {:?}", other))),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Arg>, RenderError> {
        let mut args = Vec::new();
        if self.eat(&Tok::RParen) {
            return Ok(args);
        }
        loop {
            let named = match (self.peek(), self.peek_at(1)) {
                (Some(Tok::Ident(n)), Some(Tok::Assign)) => Some(n.clone()),
                _ => None,
            };
            if named.is_some() {
                self.pos += 2;
            } else if args.iter().any(|a: &Arg| a.name.is_some()) {
                return Err(self.error("positional argument after named argument"));
            }
            let value = self.parse_expr()?;
            args.push(Arg { name: named, value });

            if self.eat(&Tok::Comma) {
                if self.eat(&Tok::RParen) {
                    break;
                }
                continue;
            }
            self.expect(Tok::RParen)?;
            break;
        }
        Ok(args)
    }

    fn parse_or(&mut self) -> Result<Condition, RenderError> {
        let mut lhs = self.parse_and()?;
        while self.eat_keyword("or") {
            let rhs = self.parse_and()?;
            lhs = Condition::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Condition, RenderError> {
        let mut lhs = self.parse_not()?;
        while self.eat_keyword("and") {
            let rhs = self.parse_not()?;
            lhs = Condition::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Condition, RenderError> {
        if self.eat_keyword("not") {
            return Ok(Condition::Not(Box::new(self.parse_not()?)));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<Condition, RenderError> {
        let lhs = self.parse_expr()?;
        let op = match self.peek() {
            Some(Tok::EqEq) => CompareOp::Eq,
            Some(Tok::NotEq) => CompareOp::Ne,
            Some(Tok::Ident(kw)) if kw == "in" => CompareOp::In,
            Some(Tok::Ident(kw)) if kw == "not" && matches!(self.peek_at(1), Some(Tok::Ident(n)) if n == "in") => {
                self.pos += 1;
                CompareOp::NotIn
            }
            _ => return Ok(Condition::Truthy(lhs)),
        };
        self.pos += 1;
        let rhs = self.parse_expr()?;
        Ok(Condition::Compare { lhs, op, rhs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outer_jinja_passes_through() {
        let t = Template::parse("t", "path: '{{ item.path }}'\n").unwrap();
        assert_eq!(t.nodes(), &[Node::Text("path: '{{ item.path }}'\n".to_string())]);
    }

    #[test]
    fn test_standalone_block_tags_take_their_line() {
        let src = "a\n{{% if X %}}\nb\n{{% endif %}}\nc\n";
        let t = Template::parse("t", src).unwrap();
        assert_eq!(t.nodes().len(), 3);
        match &t.nodes()[1] {
            Node::If { branches, otherwise } => {
                assert_eq!(branches[0].1, vec![Node::Text("b\n".to_string())]);
                assert!(otherwise.is_empty());
            }
            other => panic!("unexpected node {:?}", other),
        }
        assert_eq!(t.nodes()[2], Node::Text("c\n".to_string()));
    }

    #[test]
    fn test_macro_call_arguments() {
        let t = Template::parse(
            "t",
            "    {{{ bash_set_config_value(\"/etc/x\", parameter=PARAM, value='a' ~ B, opts=[1, true]) }}}\n",
        )
        .unwrap();
        match &t.nodes()[0] {
            Node::Output { expr, indent, line } => {
                assert_eq!(indent.as_deref(), Some("    "));
                assert_eq!(*line, 1);
                match expr {
                    Expr::Call { name, args } => {
                        assert_eq!(name, "bash_set_config_value");
                        assert_eq!(args.len(), 4);
                        assert_eq!(args[0].name, None);
                        assert_eq!(args[1].name.as_deref(), Some("parameter"));
                        assert_eq!(args[1].value, Expr::Var("PARAM".to_string()));
                        assert!(matches!(args[2].value, Expr::Concat(_)));
                        assert!(matches!(args[3].value, Expr::List(_)));
                    }
                    other => panic!("unexpected expr {:?}", other),
                }
            }
            other => panic!("unexpected node {:?}", other),
        }
        assert_eq!(t.macro_calls(), vec!["bash_set_config_value"]);
    }

    #[test]
    fn test_regex_backslashes_survive_string_literals() {
        let t = Template::parse("t", "{{{ f('^\\s*Port\\b') }}}").unwrap();
        match &t.nodes()[0] {
            Node::Output {
                expr: Expr::Call { args, .. },
                ..
            } => assert_eq!(args[0].value, Expr::Literal(Value::from("^\\s*Port\\b"))),
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_conditions() {
        let t = Template::parse(
            "t",
            "{{% if not A and B == \"x\" or C not in ['a', 'b'] %}}y{{% elif D %}}z{{% else %}}w{{% endif %}}",
        )
        .unwrap();
        match &t.nodes()[0] {
            Node::If { branches, otherwise } => {
                assert_eq!(branches.len(), 2);
                assert!(matches!(branches[0].0, Condition::Or(_, _)));
                assert_eq!(otherwise, &vec![Node::Text("w".to_string())]);
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(
            Template::parse("t", "{{{ open(").unwrap_err(),
            RenderError::Syntax { .. }
        ));
        assert!(matches!(
            Template::parse("t", "{{% if X %}}never closed").unwrap_err(),
            RenderError::Syntax { .. }
        ));
        assert!(matches!(
            Template::parse("t", "{{% endif %}}").unwrap_err(),
            RenderError::Syntax { .. }
        ));
        assert!(matches!(
            Template::parse("t", "{{% for x in y %}}{{% endfor %}}").unwrap_err(),
            RenderError::Syntax { .. }
        ));
    }

    #[test]
    fn test_comments_vanish() {
        let t = Template::parse("t", "{{# note #}}\nkeep\n").unwrap();
        assert_eq!(t.nodes(), &[Node::Text("keep\n".to_string())]);
    }
}
