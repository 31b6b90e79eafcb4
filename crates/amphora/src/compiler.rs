//! Recursive-descent compiler: consumes the item stream through a pull
//! interface (`next`/`backup`) and produces the runnable tree.
//!
//! Name binding is deferred: nodes carry textual names (after `use`-alias
//! expansion) and the Global resolves them at run time, which is what makes
//! forward references and lazy class bodies work.

use std::{cell::RefCell, rc::Rc};

use ahash::AHashMap;

use crate::{
    error::CompileError,
    location::Loc,
    node::{CatchClause, FuncDeclStmt, IncludeKind, Node, NodeKind, Script, SwitchCase},
    token::{Item, TokenKind},
    value::Str,
};

/// Compiles a lexed item stream into a script.
pub fn compile(items: Vec<Item>) -> Result<Script, CompileError> {
    let mut compiler = Compiler::new(items);
    let mut stmts = Vec::new();
    loop {
        let item = compiler.next();
        if item.is_eof() {
            break;
        }
        compiler.backup();
        stmts.push(Rc::new(compiler.compile_statement()?));
    }
    Ok(Script { stmts })
}

pub(crate) struct Compiler {
    items: Vec<Item>,
    pos: usize,
    prev: usize,
    /// `use` alias map: lowercase alias → fully qualified name.
    uses: AHashMap<String, String>,
    /// Current namespace ("" at file scope).
    namespace: String,
}

impl Compiler {
    fn new(items: Vec<Item>) -> Self {
        Self {
            items,
            pos: 0,
            prev: 0,
            uses: AHashMap::new(),
            namespace: String::new(),
        }
    }

    // --- pull interface ---------------------------------------------------

    /// Next significant item (whitespace and comments are skipped). At the
    /// end of input this keeps returning the final `Eof` item.
    pub(crate) fn next(&mut self) -> Item {
        self.prev = self.pos;
        loop {
            let Some(item) = self.items.get(self.pos) else {
                return self
                    .items
                    .last()
                    .cloned()
                    .unwrap_or_else(|| Item::new(TokenKind::Eof, "", Loc::unknown()));
            };
            self.pos += 1;
            match item.kind {
                TokenKind::Whitespace | TokenKind::Comment | TokenKind::DocComment => {}
                _ => return item.clone(),
            }
        }
    }

    /// Un-reads the item returned by the last `next()`. One level deep.
    pub(crate) fn backup(&mut self) {
        self.pos = self.prev;
    }

    /// Saved position for multi-item lookahead.
    pub(crate) fn mark_pos(&self) -> usize {
        self.pos
    }

    pub(crate) fn reset(&mut self, mark: usize) {
        self.pos = mark;
    }

    pub(crate) fn peek(&mut self) -> Item {
        let item = self.next();
        self.backup();
        item
    }

    /// Namespace currently in effect (empty at file scope).
    pub(crate) fn namespace_name(&self) -> &str {
        &self.namespace
    }

    pub(crate) fn expect_punct(&mut self, c: char) -> Result<Item, CompileError> {
        let item = self.next();
        if item.is_punct(c) {
            Ok(item)
        } else {
            Err(item.unexpected(&format!("'{c}'")))
        }
    }

    pub(crate) fn expect_identifier(&mut self) -> Result<Item, CompileError> {
        let item = self.next();
        if item.kind == TokenKind::Identifier {
            Ok(item)
        } else {
            Err(item.unexpected("identifier"))
        }
    }

    pub(crate) fn expect_variable(&mut self) -> Result<Item, CompileError> {
        let item = self.next();
        if item.kind == TokenKind::Variable {
            Ok(item)
        } else {
            Err(item.unexpected("variable"))
        }
    }

    /// Consumes `;` — or leaves a close tag / end of input in place, both
    /// of which terminate a statement.
    pub(crate) fn expect_statement_end(&mut self) -> Result<(), CompileError> {
        let item = self.next();
        match item.kind {
            TokenKind::Punct(';') => Ok(()),
            TokenKind::CloseTag | TokenKind::Eof => {
                self.backup();
                Ok(())
            }
            _ => Err(item.unexpected("';'")),
        }
    }

    // --- name resolution at compile time ----------------------------------

    /// Reads a possibly-qualified class name (`A`, `\A\B`, `A\B`), also
    /// accepting the pseudo-name keywords.
    pub(crate) fn read_class_name(&mut self) -> Result<String, CompileError> {
        let mut name = String::new();
        let first = self.next();
        match first.kind {
            TokenKind::Identifier => name.push_str(&first.data),
            TokenKind::KwStatic => return Ok("static".to_owned()),
            TokenKind::KwArray => return Ok("array".to_owned()),
            TokenKind::NsSeparator => {
                name.push('\\');
                let seg = self.expect_identifier()?;
                name.push_str(&seg.data);
            }
            _ => return Err(first.unexpected("class name")),
        }
        loop {
            let item = self.next();
            if item.kind == TokenKind::NsSeparator {
                let seg = self.expect_identifier()?;
                name.push('\\');
                name.push_str(&seg.data);
            } else {
                self.backup();
                return Ok(name);
            }
        }
    }

    /// Applies `use` aliases and the current namespace to a textual name.
    /// The emitted nodes carry the expanded name; binding happens at run
    /// time through the Global.
    pub(crate) fn resolve_class_name(&self, raw: &str) -> String {
        if let Some(absolute) = raw.strip_prefix('\\') {
            return absolute.to_owned();
        }
        if matches!(raw.to_ascii_lowercase().as_str(), "self" | "parent" | "static") {
            return raw.to_owned();
        }
        let (first, rest) = match raw.split_once('\\') {
            Some((first, rest)) => (first, Some(rest)),
            None => (raw, None),
        };
        if let Some(target) = self.uses.get(&first.to_ascii_lowercase()) {
            return match rest {
                Some(rest) => format!("{target}\\{rest}"),
                None => target.clone(),
            };
        }
        if self.namespace.is_empty() {
            raw.to_owned()
        } else {
            format!("{}\\{raw}", self.namespace)
        }
    }

    // --- statements -------------------------------------------------------

    pub(crate) fn compile_statement(&mut self) -> Result<Node, CompileError> {
        let start = self.mark_pos();
        let item = self.next();
        let loc = item.loc.clone();
        match item.kind {
            TokenKind::InlineHtml => Ok(Node::new(
                NodeKind::InlineHtml(Rc::new(Str::from(item.data))),
                loc,
            )),
            TokenKind::OpenTag | TokenKind::CloseTag => Ok(Node::new(NodeKind::Noop, loc)),
            TokenKind::OpenTagEcho => {
                let parts = self.compile_expr_list()?;
                self.expect_statement_end()?;
                Ok(Node::new(NodeKind::Echo(parts), loc))
            }
            TokenKind::Punct(';') => Ok(Node::new(NodeKind::Noop, loc)),
            TokenKind::Punct('{') => {
                let stmts = self.compile_block_body()?;
                Ok(Node::new(NodeKind::Block(stmts), loc))
            }
            TokenKind::KwIf => self.compile_if(loc),
            TokenKind::KwWhile => {
                self.expect_punct('(')?;
                let cond = self.compile_expr(0)?;
                self.expect_punct(')')?;
                let body = self.compile_statement()?;
                Ok(Node::new(
                    NodeKind::While {
                        cond: Box::new(cond),
                        body: Box::new(body),
                    },
                    loc,
                ))
            }
            TokenKind::KwDo => {
                let body = self.compile_statement()?;
                let kw = self.next();
                if kw.kind != TokenKind::KwWhile {
                    return Err(kw.unexpected("'while'"));
                }
                self.expect_punct('(')?;
                let cond = self.compile_expr(0)?;
                self.expect_punct(')')?;
                self.expect_statement_end()?;
                Ok(Node::new(
                    NodeKind::DoWhile {
                        body: Box::new(body),
                        cond: Box::new(cond),
                    },
                    loc,
                ))
            }
            TokenKind::KwFor => self.compile_for(loc),
            TokenKind::KwForeach => self.compile_foreach(loc),
            TokenKind::KwSwitch => self.compile_switch(loc),
            TokenKind::KwBreak => {
                let depth = self.compile_loop_depth()?;
                self.expect_statement_end()?;
                Ok(Node::new(NodeKind::Break(depth), loc))
            }
            TokenKind::KwContinue => {
                let depth = self.compile_loop_depth()?;
                self.expect_statement_end()?;
                Ok(Node::new(NodeKind::Continue(depth), loc))
            }
            TokenKind::KwReturn => {
                let next = self.peek();
                let expr = if next.is_punct(';') || next.kind == TokenKind::CloseTag || next.is_eof() {
                    None
                } else {
                    Some(Box::new(self.compile_expr(0)?))
                };
                self.expect_statement_end()?;
                Ok(Node::new(NodeKind::Return(expr), loc))
            }
            TokenKind::KwEcho => {
                let parts = self.compile_expr_list()?;
                self.expect_statement_end()?;
                Ok(Node::new(NodeKind::Echo(parts), loc))
            }
            TokenKind::KwFunction => {
                let after = self.next();
                match after.kind {
                    TokenKind::Identifier => self.compile_function_decl(loc, false, &after.data),
                    TokenKind::Punct('&') => {
                        let name = self.expect_identifier()?;
                        self.compile_function_decl(loc, true, &name.data)
                    }
                    _ => {
                        // anonymous function in statement position
                        self.reset(start);
                        self.compile_expr_statement()
                    }
                }
            }
            TokenKind::KwAbstract | TokenKind::KwFinal | TokenKind::KwClass | TokenKind::KwInterface
            | TokenKind::KwTrait => {
                self.reset(start);
                self.compile_class_decl()
            }
            TokenKind::KwTry => self.compile_try(loc),
            TokenKind::KwThrow => {
                let expr = self.compile_expr(0)?;
                self.expect_statement_end()?;
                Ok(Node::new(NodeKind::Throw(Box::new(expr)), loc))
            }
            TokenKind::KwGlobal => {
                let mut names = Vec::new();
                loop {
                    let var = self.expect_variable()?;
                    names.push(Rc::from(var.data.as_str()));
                    let sep = self.next();
                    if !sep.is_punct(',') {
                        self.backup();
                        break;
                    }
                }
                self.expect_statement_end()?;
                Ok(Node::new(NodeKind::GlobalVars(names), loc))
            }
            TokenKind::KwStatic => {
                let after = self.peek();
                if after.kind == TokenKind::Variable {
                    self.compile_static_vars(loc)
                } else {
                    // `static::` expression
                    self.reset(start);
                    self.compile_expr_statement()
                }
            }
            TokenKind::KwConst => {
                let mut decls = Vec::new();
                loop {
                    let name = self.expect_identifier()?;
                    self.expect_punct('=')?;
                    let value = self.compile_expr(0)?;
                    decls.push((Rc::from(name.data.as_str()), value));
                    let sep = self.next();
                    if !sep.is_punct(',') {
                        self.backup();
                        break;
                    }
                }
                self.expect_statement_end()?;
                Ok(Node::new(NodeKind::ConstDecl(decls), loc))
            }
            TokenKind::KwNamespace => {
                let name = self.read_class_name()?;
                self.expect_statement_end()?;
                self.namespace = name.clone();
                Ok(Node::new(NodeKind::NamespaceDecl(Rc::from(name.as_str())), loc))
            }
            TokenKind::KwUse => {
                loop {
                    let target = self.read_class_name()?;
                    let sep = self.next();
                    let alias = if sep.kind == TokenKind::KwAs {
                        let alias = self.expect_identifier()?;
                        alias.data
                    } else {
                        self.backup();
                        target.rsplit('\\').next().unwrap_or(&target).to_owned()
                    };
                    self.uses.insert(alias.to_ascii_lowercase(), target);
                    let sep = self.next();
                    if !sep.is_punct(',') {
                        self.backup();
                        break;
                    }
                }
                self.expect_statement_end()?;
                Ok(Node::new(NodeKind::UseDecl, loc))
            }
            TokenKind::KwUnset => {
                self.expect_punct('(')?;
                let mut targets = Vec::new();
                loop {
                    targets.push(self.compile_expr(0)?);
                    let sep = self.next();
                    if sep.is_punct(',') {
                        continue;
                    }
                    if sep.is_punct(')') {
                        break;
                    }
                    return Err(sep.unexpected("',' or ')'"));
                }
                self.expect_statement_end()?;
                Ok(Node::new(NodeKind::Unset(targets), loc))
            }
            _ => {
                self.backup();
                self.compile_expr_statement()
            }
        }
    }

    fn compile_expr_statement(&mut self) -> Result<Node, CompileError> {
        let node = self.compile_expr(0)?;
        self.expect_statement_end()?;
        Ok(node)
    }

    fn compile_expr_list(&mut self) -> Result<Vec<Node>, CompileError> {
        let mut parts = vec![self.compile_expr(0)?];
        loop {
            let sep = self.next();
            if sep.is_punct(',') {
                parts.push(self.compile_expr(0)?);
            } else {
                self.backup();
                return Ok(parts);
            }
        }
    }

    /// Statements of a `{ ... }` body; the opening brace is already consumed.
    pub(crate) fn compile_block_body(&mut self) -> Result<Vec<Node>, CompileError> {
        let mut stmts = Vec::new();
        loop {
            let item = self.next();
            if item.is_punct('}') {
                return Ok(stmts);
            }
            if item.is_eof() {
                return Err(item.unexpected("'}'"));
            }
            self.backup();
            stmts.push(self.compile_statement()?);
        }
    }

    fn compile_if(&mut self, loc: Loc) -> Result<Node, CompileError> {
        self.expect_punct('(')?;
        let cond = self.compile_expr(0)?;
        self.expect_punct(')')?;
        let then = self.compile_statement()?;
        let next = self.next();
        let otherwise = match next.kind {
            TokenKind::KwElseif => Some(Box::new(self.compile_if(next.loc.clone())?)),
            TokenKind::KwElse => Some(Box::new(self.compile_statement()?)),
            _ => {
                self.backup();
                None
            }
        };
        Ok(Node::new(
            NodeKind::If {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise,
            },
            loc,
        ))
    }

    fn compile_for(&mut self, loc: Loc) -> Result<Node, CompileError> {
        self.expect_punct('(')?;
        let init = self.compile_for_clause(';')?;
        let cond = self.compile_for_clause(';')?;
        let step = self.compile_for_clause(')')?;
        let body = self.compile_statement()?;
        Ok(Node::new(
            NodeKind::For {
                init,
                cond,
                step,
                body: Box::new(body),
            },
            loc,
        ))
    }

    /// Comma-separated, possibly empty expression list ended by `end`.
    fn compile_for_clause(&mut self, end: char) -> Result<Vec<Node>, CompileError> {
        let mut exprs = Vec::new();
        if self.peek().is_punct(end) {
            self.next();
            return Ok(exprs);
        }
        loop {
            exprs.push(self.compile_expr(0)?);
            let sep = self.next();
            if sep.is_punct(',') {
                continue;
            }
            if sep.is_punct(end) {
                return Ok(exprs);
            }
            return Err(sep.unexpected(&format!("',' or '{end}'")));
        }
    }

    fn compile_foreach(&mut self, loc: Loc) -> Result<Node, CompileError> {
        self.expect_punct('(')?;
        let subject = self.compile_expr(0)?;
        let kw = self.next();
        if kw.kind != TokenKind::KwAs {
            return Err(kw.unexpected("'as'"));
        }
        let (mut by_ref, first) = self.compile_foreach_target()?;
        let (key, value) = {
            let sep = self.next();
            if sep.kind == TokenKind::DoubleArrow {
                if by_ref {
                    return Err(CompileError::new("key cannot be iterated by reference", sep.loc));
                }
                let (value_ref, value) = self.compile_foreach_target()?;
                by_ref = value_ref;
                (Some(Box::new(first)), value)
            } else {
                self.backup();
                (None, first)
            }
        };
        self.expect_punct(')')?;
        let body = self.compile_statement()?;
        Ok(Node::new(
            NodeKind::Foreach {
                subject: Box::new(subject),
                key,
                value: Box::new(value),
                by_ref,
                body: Box::new(body),
            },
            loc,
        ))
    }

    fn compile_foreach_target(&mut self) -> Result<(bool, Node), CompileError> {
        let item = self.next();
        let by_ref = item.is_punct('&');
        if !by_ref {
            self.backup();
        }
        let target = self.compile_expr(17)?;
        if !target.is_lvalue() {
            return Err(CompileError::new(
                "foreach target must be a variable",
                target.loc.clone(),
            ));
        }
        Ok((by_ref, target))
    }

    fn compile_switch(&mut self, loc: Loc) -> Result<Node, CompileError> {
        self.expect_punct('(')?;
        let subject = self.compile_expr(0)?;
        self.expect_punct(')')?;
        self.expect_punct('{')?;
        let mut cases = Vec::new();
        loop {
            let item = self.next();
            match item.kind {
                TokenKind::Punct('}') => break,
                TokenKind::KwCase => {
                    let test = self.compile_expr(0)?;
                    let sep = self.next();
                    if !(sep.is_punct(':') || sep.is_punct(';')) {
                        return Err(sep.unexpected("':'"));
                    }
                    let body = self.compile_case_body()?;
                    cases.push(SwitchCase { test: Some(test), body });
                }
                TokenKind::KwDefault => {
                    let sep = self.next();
                    if !(sep.is_punct(':') || sep.is_punct(';')) {
                        return Err(sep.unexpected("':'"));
                    }
                    let body = self.compile_case_body()?;
                    cases.push(SwitchCase { test: None, body });
                }
                _ => return Err(item.unexpected("'case', 'default' or '}'")),
            }
        }
        Ok(Node::new(
            NodeKind::Switch {
                subject: Box::new(subject),
                cases,
            },
            loc,
        ))
    }

    fn compile_case_body(&mut self) -> Result<Vec<Node>, CompileError> {
        let mut stmts = Vec::new();
        loop {
            let item = self.peek();
            match item.kind {
                TokenKind::KwCase | TokenKind::KwDefault | TokenKind::Punct('}') => return Ok(stmts),
                TokenKind::Eof => return Err(item.unexpected("'}'")),
                _ => stmts.push(self.compile_statement()?),
            }
        }
    }

    fn compile_loop_depth(&mut self) -> Result<u32, CompileError> {
        let item = self.next();
        if item.kind == TokenKind::IntLiteral {
            let depth: u32 = item
                .data
                .parse()
                .map_err(|_| CompileError::new("invalid break/continue depth", item.loc.clone()))?;
            if depth == 0 {
                return Err(CompileError::new(
                    "break/continue depth must be at least 1",
                    item.loc,
                ));
            }
            Ok(depth)
        } else {
            self.backup();
            Ok(1)
        }
    }

    fn compile_try(&mut self, loc: Loc) -> Result<Node, CompileError> {
        self.expect_punct('{')?;
        let body = self.compile_block_body()?;
        let mut catches = Vec::new();
        let mut finally = None;
        loop {
            let item = self.next();
            match item.kind {
                TokenKind::KwCatch => {
                    self.expect_punct('(')?;
                    let mut class_names = Vec::new();
                    let var;
                    loop {
                        let name = self.read_class_name()?;
                        class_names.push(Rc::from(self.resolve_class_name(&name).as_str()));
                        let sep = self.next();
                        if sep.is_punct('|') {
                            continue;
                        }
                        if sep.kind == TokenKind::Variable {
                            var = Rc::from(sep.data.as_str());
                            break;
                        }
                        return Err(sep.unexpected("'|' or variable"));
                    }
                    self.expect_punct(')')?;
                    self.expect_punct('{')?;
                    let body = self.compile_block_body()?;
                    catches.push(CatchClause {
                        class_names,
                        var,
                        body,
                    });
                }
                TokenKind::KwFinally => {
                    self.expect_punct('{')?;
                    finally = Some(self.compile_block_body()?);
                    break;
                }
                _ => {
                    self.backup();
                    break;
                }
            }
        }
        if catches.is_empty() && finally.is_none() {
            return Err(CompileError::new(
                "cannot use try without catch or finally",
                loc,
            ));
        }
        Ok(Node::new(NodeKind::Try { body, catches, finally }, loc))
    }

    fn compile_static_vars(&mut self, loc: Loc) -> Result<Node, CompileError> {
        let mut decls = Vec::new();
        loop {
            let var = self.expect_variable()?;
            let next = self.next();
            let init = if next.is_punct('=') {
                let expr = self.compile_expr(0)?;
                Some(Rc::new(crate::class::Delayed::new(expr)))
            } else {
                self.backup();
                None
            };
            decls.push((Rc::from(var.data.as_str()), init));
            let sep = self.next();
            if !sep.is_punct(',') {
                self.backup();
                break;
            }
        }
        self.expect_statement_end()?;
        Ok(Node::new(NodeKind::StaticVars(decls), loc))
    }

    fn compile_function_decl(&mut self, loc: Loc, by_ref: bool, name: &str) -> Result<Node, CompileError> {
        let func = self.compile_function_rest(loc.clone(), name, by_ref)?;
        Ok(Node::new(
            NodeKind::FuncDecl(Rc::new(FuncDeclStmt {
                name: Rc::from(name),
                func,
                executed: RefCell::new(false),
            })),
            loc,
        ))
    }

    /// Maps an include-family keyword to its node kind.
    pub(crate) fn include_kind(kind: TokenKind) -> Option<IncludeKind> {
        Some(match kind {
            TokenKind::KwInclude => IncludeKind::Include,
            TokenKind::KwIncludeOnce => IncludeKind::IncludeOnce,
            TokenKind::KwRequire => IncludeKind::Require,
            TokenKind::KwRequireOnce => IncludeKind::RequireOnce,
            _ => return None,
        })
    }
}
