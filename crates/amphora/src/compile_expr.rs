//! Precedence-climbing expression compiler.

use std::rc::Rc;

use crate::{
    compiler::Compiler,
    error::CompileError,
    location::Loc,
    node::{BinaryOp, ClassTarget, Node, NodeKind, PropName, UnaryOp},
    token::{Item, TokenKind},
    value::{Str, Value},
};

/// Binding power and associativity of an infix operator item.
fn infix_binding(kind: TokenKind) -> Option<(u8, bool)> {
    Some(match kind {
        TokenKind::KwOr => (1, false),
        TokenKind::KwXor => (2, false),
        TokenKind::KwAnd => (3, false),
        TokenKind::Punct('=')
        | TokenKind::PlusEq
        | TokenKind::MinusEq
        | TokenKind::MulEq
        | TokenKind::DivEq
        | TokenKind::ModEq
        | TokenKind::ConcatEq
        | TokenKind::AndEq
        | TokenKind::OrEq
        | TokenKind::XorEq
        | TokenKind::ShlEq
        | TokenKind::ShrEq
        | TokenKind::PowEq
        | TokenKind::CoalesceEq => (4, true),
        TokenKind::Punct('?') => (5, false),
        TokenKind::Coalesce => (6, true),
        TokenKind::OrOr => (7, false),
        TokenKind::AndAnd => (8, false),
        TokenKind::Punct('|') => (9, false),
        TokenKind::Punct('^') => (10, false),
        TokenKind::Punct('&') => (11, false),
        TokenKind::EqEq | TokenKind::NotEq | TokenKind::EqEqEq | TokenKind::NotEqEq => (12, false),
        TokenKind::Punct('<') | TokenKind::Le | TokenKind::Punct('>') | TokenKind::Ge | TokenKind::Spaceship => {
            (13, false)
        }
        TokenKind::Shl | TokenKind::Shr => (14, false),
        TokenKind::Punct('+') | TokenKind::Punct('-') | TokenKind::Punct('.') => (15, false),
        TokenKind::Punct('*') | TokenKind::Punct('/') | TokenKind::Punct('%') => (16, false),
        TokenKind::KwInstanceof => (17, false),
        TokenKind::Pow => (18, true),
        _ => return None,
    })
}

fn compound_op(kind: TokenKind) -> Option<BinaryOp> {
    Some(match kind {
        TokenKind::PlusEq => BinaryOp::Add,
        TokenKind::MinusEq => BinaryOp::Sub,
        TokenKind::MulEq => BinaryOp::Mul,
        TokenKind::DivEq => BinaryOp::Div,
        TokenKind::ModEq => BinaryOp::Mod,
        TokenKind::ConcatEq => BinaryOp::Concat,
        TokenKind::AndEq => BinaryOp::BitAnd,
        TokenKind::OrEq => BinaryOp::BitOr,
        TokenKind::XorEq => BinaryOp::BitXor,
        TokenKind::ShlEq => BinaryOp::Shl,
        TokenKind::ShrEq => BinaryOp::Shr,
        TokenKind::PowEq => BinaryOp::Pow,
        _ => return None,
    })
}

fn plain_binary(kind: TokenKind) -> Option<BinaryOp> {
    Some(match kind {
        TokenKind::KwOr | TokenKind::OrOr => BinaryOp::Or,
        TokenKind::KwAnd | TokenKind::AndAnd => BinaryOp::And,
        TokenKind::KwXor => BinaryOp::Xor,
        TokenKind::Punct('|') => BinaryOp::BitOr,
        TokenKind::Punct('^') => BinaryOp::BitXor,
        TokenKind::Punct('&') => BinaryOp::BitAnd,
        TokenKind::EqEq => BinaryOp::Eq,
        TokenKind::NotEq => BinaryOp::NotEq,
        TokenKind::EqEqEq => BinaryOp::Identical,
        TokenKind::NotEqEq => BinaryOp::NotIdentical,
        TokenKind::Punct('<') => BinaryOp::Lt,
        TokenKind::Le => BinaryOp::Le,
        TokenKind::Punct('>') => BinaryOp::Gt,
        TokenKind::Ge => BinaryOp::Ge,
        TokenKind::Spaceship => BinaryOp::Spaceship,
        TokenKind::Shl => BinaryOp::Shl,
        TokenKind::Shr => BinaryOp::Shr,
        TokenKind::Punct('+') => BinaryOp::Add,
        TokenKind::Punct('-') => BinaryOp::Sub,
        TokenKind::Punct('.') => BinaryOp::Concat,
        TokenKind::Punct('*') => BinaryOp::Mul,
        TokenKind::Punct('/') => BinaryOp::Div,
        TokenKind::Punct('%') => BinaryOp::Mod,
        TokenKind::Pow => BinaryOp::Pow,
        _ => return None,
    })
}

impl Compiler {
    /// Compiles an expression, consuming operators whose precedence is at
    /// least `min_prec`.
    pub(crate) fn compile_expr(&mut self, min_prec: u8) -> Result<Node, CompileError> {
        let mut lhs = self.compile_prefix()?;
        loop {
            let item = self.next();
            let Some((prec, right_assoc)) = infix_binding(item.kind) else {
                self.backup();
                return Ok(lhs);
            };
            if prec < min_prec {
                self.backup();
                return Ok(lhs);
            }
            lhs = self.compile_infix(lhs, &item, prec, right_assoc)?;
        }
    }

    fn compile_infix(&mut self, lhs: Node, item: &Item, prec: u8, right_assoc: bool) -> Result<Node, CompileError> {
        let loc = item.loc.clone();
        let next_min = if right_assoc { prec } else { prec + 1 };

        // assignment family
        if item.is_punct('=') {
            if !lhs.is_lvalue() {
                return Err(CompileError::new("cannot assign to this expression", lhs.loc));
            }
            if self.peek().is_punct('&') {
                self.next();
                let value = self.compile_expr(next_min)?;
                return Ok(Node::new(
                    NodeKind::AssignRef {
                        target: Box::new(lhs),
                        value: Box::new(value),
                    },
                    loc,
                ));
            }
            let value = self.compile_expr(next_min)?;
            return Ok(Node::new(
                NodeKind::Assign {
                    target: Box::new(lhs),
                    value: Box::new(value),
                },
                loc,
            ));
        }
        if item.kind == TokenKind::CoalesceEq {
            if !lhs.is_lvalue() {
                return Err(CompileError::new("cannot assign to this expression", lhs.loc));
            }
            // `a ??= b` desugars to `a = a ?? b` with an isset-style left side
            let value = self.compile_expr(next_min)?;
            let lhs_copy = Box::new(lhs);
            let coalesce = Node::new(
                NodeKind::Coalesce {
                    lhs: clone_lvalue(&lhs_copy)?,
                    rhs: Box::new(value),
                },
                loc.clone(),
            );
            return Ok(Node::new(
                NodeKind::Assign {
                    target: lhs_copy,
                    value: Box::new(coalesce),
                },
                loc,
            ));
        }
        if let Some(op) = compound_op(item.kind) {
            if !lhs.is_lvalue() {
                return Err(CompileError::new("cannot assign to this expression", lhs.loc));
            }
            let value = self.compile_expr(next_min)?;
            return Ok(Node::new(
                NodeKind::AssignOp {
                    op,
                    target: Box::new(lhs),
                    value: Box::new(value),
                },
                loc,
            ));
        }

        if item.is_punct('?') {
            let then = if self.peek().is_punct(':') {
                None
            } else {
                Some(Box::new(self.compile_expr(0)?))
            };
            self.expect_punct(':')?;
            // ternary nests left-associatively: the else branch binds one
            // level tighter and the outer loop consumes any following `?`
            let otherwise = self.compile_expr(prec + 1)?;
            return Ok(Node::new(
                NodeKind::Ternary {
                    cond: Box::new(lhs),
                    then,
                    otherwise: Box::new(otherwise),
                },
                loc,
            ));
        }
        if item.kind == TokenKind::Coalesce {
            let rhs = self.compile_expr(next_min)?;
            return Ok(Node::new(
                NodeKind::Coalesce {
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                loc,
            ));
        }
        if item.kind == TokenKind::KwInstanceof {
            let class = self.compile_class_target()?;
            return Ok(Node::new(
                NodeKind::InstanceOf {
                    expr: Box::new(lhs),
                    class,
                },
                loc,
            ));
        }

        let op = plain_binary(item.kind).expect("binding table and op table agree");
        let rhs = self.compile_expr(next_min)?;
        Ok(Node::new(
            NodeKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            loc,
        ))
    }

    fn compile_prefix(&mut self) -> Result<Node, CompileError> {
        let item = self.next();
        let loc = item.loc.clone();
        let node = match item.kind {
            TokenKind::IntLiteral => Node::new(NodeKind::Literal(int_literal_value(&item.data)), loc),
            TokenKind::FloatLiteral => Node::new(
                NodeKind::Literal(Value::Float(item.data.parse().unwrap_or(0.0))),
                loc,
            ),
            TokenKind::SingleQuoted => Node::new(
                NodeKind::Literal(Value::String(Rc::new(Str::from_bytes(unescape_single(
                    item.data.as_bytes(),
                ))))),
                loc,
            ),
            TokenKind::Punct('"') => self.compile_interp_until(loc, InterpEnd::Quote, true)?,
            TokenKind::StartHeredoc => self.compile_interp_until(loc, InterpEnd::Heredoc, true)?,
            TokenKind::StartNowdoc => self.compile_interp_until(loc, InterpEnd::Heredoc, false)?,
            TokenKind::Variable => Node::new(NodeKind::Var(Rc::from(item.data.as_str())), loc),
            TokenKind::Punct('$') => {
                let inner = self.compile_variable_variable()?;
                Node::new(NodeKind::VarVar(Box::new(inner)), loc)
            }
            TokenKind::Punct('(') => {
                let inner = self.compile_expr(0)?;
                self.expect_punct(')')?;
                inner
            }
            TokenKind::Cast(kind) => {
                let expr = self.compile_expr(18)?;
                Node::new(
                    NodeKind::Cast {
                        kind,
                        expr: Box::new(expr),
                    },
                    loc,
                )
            }
            TokenKind::Punct('-') => {
                let expr = self.compile_expr(18)?;
                Node::new(
                    NodeKind::Unary {
                        op: UnaryOp::Neg,
                        expr: Box::new(expr),
                    },
                    loc,
                )
            }
            TokenKind::Punct('+') => {
                let expr = self.compile_expr(18)?;
                Node::new(
                    NodeKind::Unary {
                        op: UnaryOp::Plus,
                        expr: Box::new(expr),
                    },
                    loc,
                )
            }
            TokenKind::Punct('!') => {
                let expr = self.compile_expr(17)?;
                Node::new(
                    NodeKind::Unary {
                        op: UnaryOp::Not,
                        expr: Box::new(expr),
                    },
                    loc,
                )
            }
            TokenKind::Punct('~') => {
                let expr = self.compile_expr(18)?;
                Node::new(
                    NodeKind::Unary {
                        op: UnaryOp::BitNot,
                        expr: Box::new(expr),
                    },
                    loc,
                )
            }
            // error suppression is accepted and ignored
            TokenKind::Punct('@') => self.compile_expr(17)?,
            TokenKind::Inc => {
                let target = self.compile_expr(18)?;
                require_lvalue(&target)?;
                Node::new(
                    NodeKind::IncDec {
                        pre: true,
                        inc: true,
                        target: Box::new(target),
                    },
                    loc,
                )
            }
            TokenKind::Dec => {
                let target = self.compile_expr(18)?;
                require_lvalue(&target)?;
                Node::new(
                    NodeKind::IncDec {
                        pre: true,
                        inc: false,
                        target: Box::new(target),
                    },
                    loc,
                )
            }
            TokenKind::Identifier | TokenKind::NsSeparator => {
                self.backup();
                let raw = self.read_class_name()?;
                self.compile_name_expr(raw, loc)?
            }
            TokenKind::KwStatic => {
                let sep = self.next();
                if sep.kind != TokenKind::DoubleColon {
                    return Err(sep.unexpected("'::'"));
                }
                self.compile_static_access("static".to_owned(), loc)?
            }
            TokenKind::KwArray => {
                self.expect_punct('(')?;
                let entries = self.compile_array_entries(')')?;
                Node::new(NodeKind::ArrayLit(entries), loc)
            }
            TokenKind::Punct('[') => {
                let entries = self.compile_array_entries(']')?;
                Node::new(NodeKind::ArrayLit(entries), loc)
            }
            TokenKind::KwNew => self.compile_new(loc)?,
            TokenKind::KwFunction => self.compile_closure(loc)?,
            TokenKind::KwIsset => {
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
                Node::new(NodeKind::Isset(targets), loc)
            }
            TokenKind::KwEmpty => {
                self.expect_punct('(')?;
                let expr = self.compile_expr(0)?;
                self.expect_punct(')')?;
                Node::new(NodeKind::Empty(Box::new(expr)), loc)
            }
            TokenKind::KwInclude | TokenKind::KwIncludeOnce | TokenKind::KwRequire | TokenKind::KwRequireOnce => {
                let kind = Self::include_kind(item.kind).expect("include keywords map to a kind");
                let expr = self.compile_expr(1)?;
                Node::new(
                    NodeKind::Include {
                        kind,
                        expr: Box::new(expr),
                    },
                    loc,
                )
            }
            TokenKind::KwPrint => {
                let expr = self.compile_expr(1)?;
                Node::new(NodeKind::Print(Box::new(expr)), loc)
            }
            TokenKind::KwExit => {
                let expr = if self.peek().is_punct('(') {
                    self.next();
                    if self.peek().is_punct(')') {
                        self.next();
                        None
                    } else {
                        let e = self.compile_expr(0)?;
                        self.expect_punct(')')?;
                        Some(Box::new(e))
                    }
                } else {
                    None
                };
                Node::new(NodeKind::Exit(expr), loc)
            }
            _ => return Err(item.unexpected("expression")),
        };
        self.compile_postfix(node)
    }

    /// `$$name`, `$$$name`, ... — the inner variable of a variable-variable.
    fn compile_variable_variable(&mut self) -> Result<Node, CompileError> {
        let item = self.next();
        let loc = item.loc.clone();
        match item.kind {
            TokenKind::Variable => Ok(Node::new(NodeKind::Var(Rc::from(item.data.as_str())), loc)),
            TokenKind::Punct('$') => {
                let inner = self.compile_variable_variable()?;
                Ok(Node::new(NodeKind::VarVar(Box::new(inner)), loc))
            }
            _ => Err(item.unexpected("variable")),
        }
    }

    fn compile_postfix(&mut self, mut node: Node) -> Result<Node, CompileError> {
        loop {
            let item = self.next();
            let loc = item.loc.clone();
            node = match item.kind {
                TokenKind::Punct('[') => {
                    if self.peek().is_punct(']') {
                        self.next();
                        Node::new(
                            NodeKind::Index {
                                base: Box::new(node),
                                index: None,
                            },
                            loc,
                        )
                    } else {
                        let index = self.compile_expr(0)?;
                        self.expect_punct(']')?;
                        Node::new(
                            NodeKind::Index {
                                base: Box::new(node),
                                index: Some(Box::new(index)),
                            },
                            loc,
                        )
                    }
                }
                TokenKind::Arrow => {
                    let name = self.compile_member_name()?;
                    if self.peek().is_punct('(') {
                        self.next();
                        let args = self.compile_args_after_paren()?;
                        Node::new(
                            NodeKind::MethodCall {
                                base: Box::new(node),
                                name,
                                args,
                            },
                            loc,
                        )
                    } else {
                        Node::new(
                            NodeKind::Prop {
                                base: Box::new(node),
                                name,
                            },
                            loc,
                        )
                    }
                }
                TokenKind::Punct('(') => {
                    let args = self.compile_args_after_paren()?;
                    Node::new(
                        NodeKind::CallDynamic {
                            target: Box::new(node),
                            args,
                        },
                        loc,
                    )
                }
                TokenKind::Inc => {
                    require_lvalue(&node)?;
                    Node::new(
                        NodeKind::IncDec {
                            pre: false,
                            inc: true,
                            target: Box::new(node),
                        },
                        loc,
                    )
                }
                TokenKind::Dec => {
                    require_lvalue(&node)?;
                    Node::new(
                        NodeKind::IncDec {
                            pre: false,
                            inc: false,
                            target: Box::new(node),
                        },
                        loc,
                    )
                }
                _ => {
                    self.backup();
                    return Ok(node);
                }
            };
        }
    }

    fn compile_member_name(&mut self) -> Result<PropName, CompileError> {
        let item = self.next();
        match item.kind {
            TokenKind::Identifier => Ok(PropName::Fixed(Rc::from(item.data.as_str()))),
            TokenKind::Variable => Ok(PropName::Dynamic(Box::new(Node::new(
                NodeKind::Var(Rc::from(item.data.as_str())),
                item.loc,
            )))),
            TokenKind::Punct('{') => {
                let expr = self.compile_expr(0)?;
                self.expect_punct('}')?;
                Ok(PropName::Dynamic(Box::new(expr)))
            }
            _ => Err(item.unexpected("member name")),
        }
    }

    /// Arguments after a consumed `(`.
    pub(crate) fn compile_args_after_paren(&mut self) -> Result<Vec<Node>, CompileError> {
        let mut args = Vec::new();
        if self.peek().is_punct(')') {
            self.next();
            return Ok(args);
        }
        loop {
            args.push(self.compile_expr(0)?);
            let sep = self.next();
            if sep.is_punct(',') {
                continue;
            }
            if sep.is_punct(')') {
                return Ok(args);
            }
            return Err(sep.unexpected("',' or ')'"));
        }
    }

    /// `[...]` / `array(...)` entries after the opening delimiter.
    fn compile_array_entries(&mut self, end: char) -> Result<Vec<(Option<Node>, Node)>, CompileError> {
        let mut entries = Vec::new();
        loop {
            if self.peek().is_punct(end) {
                self.next();
                return Ok(entries);
            }
            let first = self.compile_expr(0)?;
            let sep = self.next();
            if sep.kind == TokenKind::DoubleArrow {
                let value = self.compile_expr(0)?;
                entries.push((Some(first), value));
            } else {
                self.backup();
                entries.push((None, first));
            }
            let sep = self.next();
            if sep.is_punct(',') {
                continue;
            }
            if sep.is_punct(end) {
                return Ok(entries);
            }
            return Err(sep.unexpected(&format!("',' or '{end}'")));
        }
    }

    /// A bare name in expression position: literal keyword constant,
    /// function call, static access, or constant fetch.
    fn compile_name_expr(&mut self, raw: String, loc: Loc) -> Result<Node, CompileError> {
        match raw.to_ascii_lowercase().as_str() {
            "true" => return Ok(Node::new(NodeKind::Literal(Value::Bool(true)), loc)),
            "false" => return Ok(Node::new(NodeKind::Literal(Value::Bool(false)), loc)),
            "null" => return Ok(Node::new(NodeKind::Literal(Value::Null), loc)),
            _ => {}
        }
        let item = self.next();
        match item.kind {
            TokenKind::Punct('(') => {
                let args = self.compile_args_after_paren()?;
                let name = raw.strip_prefix('\\').unwrap_or(&raw);
                Ok(Node::new(
                    NodeKind::Call {
                        name: Rc::from(name),
                        args,
                    },
                    loc,
                ))
            }
            TokenKind::DoubleColon => {
                let class = self.resolve_class_name(&raw);
                self.compile_static_access(class, loc)
            }
            _ => {
                self.backup();
                let name = raw.strip_prefix('\\').unwrap_or(&raw);
                Ok(Node::new(NodeKind::ConstFetch(Rc::from(name)), loc))
            }
        }
    }

    /// Everything after `Name::`.
    fn compile_static_access(&mut self, class: String, loc: Loc) -> Result<Node, CompileError> {
        let class: Rc<str> = Rc::from(class.as_str());
        let item = self.next();
        match item.kind {
            TokenKind::Variable => Ok(Node::new(
                NodeKind::StaticProp {
                    class,
                    name: Rc::from(item.data.as_str()),
                },
                loc,
            )),
            TokenKind::KwClass => Ok(Node::new(
                NodeKind::Literal(Value::string(&*class)),
                loc,
            )),
            TokenKind::Identifier => {
                if self.peek().is_punct('(') {
                    self.next();
                    let args = self.compile_args_after_paren()?;
                    Ok(Node::new(
                        NodeKind::StaticCall {
                            class,
                            name: Rc::from(item.data.as_str()),
                            args,
                        },
                        loc,
                    ))
                } else {
                    Ok(Node::new(
                        NodeKind::ClassConst {
                            class,
                            name: Rc::from(item.data.as_str()),
                        },
                        loc,
                    ))
                }
            }
            _ => Err(item.unexpected("member name after '::'")),
        }
    }

    fn compile_new(&mut self, loc: Loc) -> Result<Node, CompileError> {
        let class = self.compile_class_target()?;
        let args = if self.peek().is_punct('(') {
            self.next();
            self.compile_args_after_paren()?
        } else {
            Vec::new()
        };
        Ok(Node::new(NodeKind::New { class, args }, loc))
    }

    pub(crate) fn compile_class_target(&mut self) -> Result<ClassTarget, CompileError> {
        let item = self.peek();
        match item.kind {
            TokenKind::Identifier | TokenKind::NsSeparator => {
                let raw = self.read_class_name()?;
                Ok(ClassTarget::Name(Rc::from(self.resolve_class_name(&raw).as_str())))
            }
            TokenKind::KwStatic => {
                self.next();
                Ok(ClassTarget::Name(Rc::from("static")))
            }
            _ => {
                let expr = self.compile_expr(18)?;
                Ok(ClassTarget::Expr(Box::new(expr)))
            }
        }
    }

    /// Interpolated string body: fragments until the closing delimiter.
    fn compile_interp_until(&mut self, loc: Loc, end: InterpEnd, process_escapes: bool) -> Result<Node, CompileError> {
        let mut parts = Vec::new();
        loop {
            let item = self.next();
            match item.kind {
                TokenKind::EncapsedText => {
                    let bytes = if process_escapes {
                        unescape_double(item.data.as_bytes())
                    } else {
                        item.data.clone().into_bytes()
                    };
                    parts.push(Node::new(
                        NodeKind::Literal(Value::String(Rc::new(Str::from_bytes(bytes)))),
                        item.loc,
                    ));
                }
                TokenKind::Variable => {
                    parts.push(Node::new(NodeKind::Var(Rc::from(item.data.as_str())), item.loc));
                }
                TokenKind::Punct('"') if end == InterpEnd::Quote => break,
                TokenKind::EndHeredoc if end == InterpEnd::Heredoc => break,
                _ => return Err(item.unexpected("string fragment")),
            }
        }
        if parts.is_empty() {
            return Ok(Node::new(NodeKind::Literal(Value::string("")), loc));
        }
        if parts.len() == 1 && matches!(parts[0].kind, NodeKind::Literal(_)) {
            return Ok(parts.pop().expect("length checked above"));
        }
        Ok(Node::new(NodeKind::Interp(parts), loc))
    }
}

#[derive(PartialEq, Eq, Clone, Copy)]
enum InterpEnd {
    Quote,
    Heredoc,
}

fn require_lvalue(node: &Node) -> Result<(), CompileError> {
    if node.is_lvalue() {
        Ok(())
    } else {
        Err(CompileError::new(
            "increment/decrement target must be a variable",
            node.loc.clone(),
        ))
    }
}

/// Rebuilds an lvalue node for the `??=` desugaring. Only the shapes that
/// can appear on the left of `??=` are supported.
fn clone_lvalue(node: &Node) -> Result<Box<Node>, CompileError> {
    let kind = match &node.kind {
        NodeKind::Var(name) => NodeKind::Var(name.clone()),
        NodeKind::Index { base, index } => NodeKind::Index {
            base: clone_lvalue(base)?,
            index: match index {
                Some(idx) => Some(clone_lvalue(idx)?),
                None => None,
            },
        },
        NodeKind::Literal(v) => NodeKind::Literal(v.clone()),
        NodeKind::StaticProp { class, name } => NodeKind::StaticProp {
            class: class.clone(),
            name: name.clone(),
        },
        _ => {
            return Err(CompileError::new(
                "unsupported target for '??='",
                node.loc.clone(),
            ));
        }
    };
    Ok(Box::new(Node::new(kind, node.loc.clone())))
}

/// Integer literal in any of the supported bases; values exceeding the
/// integer range fall back to float, as the language requires.
#[must_use]
pub(crate) fn int_literal_value(text: &str) -> Value {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return match i64::from_str_radix(hex, 16) {
            Ok(v) => Value::Int(v),
            Err(_) => Value::Float(u64::from_str_radix(hex, 16).map_or(f64::INFINITY, |v| v as f64)),
        };
    }
    if let Some(bin) = text.strip_prefix("0b").or_else(|| text.strip_prefix("0B")) {
        return match i64::from_str_radix(bin, 2) {
            Ok(v) => Value::Int(v),
            Err(_) => Value::Float(u64::from_str_radix(bin, 2).map_or(f64::INFINITY, |v| v as f64)),
        };
    }
    if text.len() > 1 && text.starts_with('0') && text.bytes().all(|c| (b'0'..=b'7').contains(&c)) {
        if let Ok(v) = i64::from_str_radix(&text[1..], 8) {
            return Value::Int(v);
        }
    }
    match text.parse::<i64>() {
        Ok(v) => Value::Int(v),
        Err(_) => Value::Float(text.parse::<f64>().unwrap_or(0.0)),
    }
}

/// Escape processing for single-quoted strings: `\'` and `\\` only.
#[must_use]
pub(crate) fn unescape_single(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 1 < bytes.len() && matches!(bytes[i + 1], b'\'' | b'\\') {
            out.push(bytes[i + 1]);
            i += 2;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    out
}

/// Escape processing for double-quoted and heredoc fragments.
#[must_use]
pub(crate) fn unescape_double(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' || i + 1 >= bytes.len() {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        let c = bytes[i + 1];
        i += 2;
        match c {
            b'n' => out.push(b'\n'),
            b't' => out.push(b'\t'),
            b'r' => out.push(b'\r'),
            b'v' => out.push(0x0B),
            b'f' => out.push(0x0C),
            b'e' => out.push(0x1B),
            b'\\' => out.push(b'\\'),
            b'$' => out.push(b'$'),
            b'"' => out.push(b'"'),
            b'x' => {
                let mut value = 0u32;
                let mut digits = 0;
                while digits < 2 && i < bytes.len() && bytes[i].is_ascii_hexdigit() {
                    value = value * 16 + u32::from((bytes[i] as char).to_digit(16).unwrap_or(0));
                    i += 1;
                    digits += 1;
                }
                if digits == 0 {
                    out.extend_from_slice(b"\\x");
                } else {
                    out.push(value as u8);
                }
            }
            b'0'..=b'7' => {
                let mut value = u32::from(c - b'0');
                let mut digits = 1;
                while digits < 3 && i < bytes.len() && (b'0'..=b'7').contains(&bytes[i]) {
                    value = value * 8 + u32::from(bytes[i] - b'0');
                    i += 1;
                    digits += 1;
                }
                out.push(value as u8);
            }
            b'u' if i < bytes.len() && bytes[i] == b'{' => {
                let close = bytes[i..].iter().position(|&b| b == b'}');
                match close {
                    Some(rel) => {
                        let hex = &bytes[i + 1..i + rel];
                        let text = std::str::from_utf8(hex).unwrap_or("");
                        match u32::from_str_radix(text, 16).ok().and_then(char::from_u32) {
                            Some(ch) => {
                                let mut buf = [0u8; 4];
                                out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                            }
                            None => out.extend_from_slice(b"\\u"),
                        }
                        i += rel + 1;
                    }
                    None => out.extend_from_slice(b"\\u"),
                }
            }
            other => {
                // unknown escapes keep the backslash
                out.push(b'\\');
                out.push(other);
            }
        }
    }
    out
}
