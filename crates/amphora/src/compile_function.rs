//! Function headers, parameter lists, and closures.

use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

use indexmap::IndexMap;

use crate::{
    class::Delayed,
    compiler::Compiler,
    error::CompileError,
    function::{Param, PhpFunction},
    location::Loc,
    node::{CaptureSpec, Node, NodeKind},
    token::TokenKind,
};

impl Compiler {
    /// Parameter list, return type and body of a function whose name (and
    /// by-ref marker) the caller already consumed.
    pub(crate) fn compile_function_rest(
        &mut self,
        loc: Loc,
        name: &str,
        by_ref_return: bool,
    ) -> Result<Rc<PhpFunction>, CompileError> {
        self.expect_punct('(')?;
        let params = self.compile_params()?;
        let return_type = self.compile_return_type()?;
        // interface and abstract declarations end at `;` with no body
        let opener = self.next();
        let body = if opener.is_punct('{') {
            self.compile_block_body()?
        } else if opener.is_punct(';') {
            Vec::new()
        } else {
            return Err(opener.unexpected("'{' or ';'"));
        };
        Ok(Rc::new(PhpFunction {
            name: Rc::from(name),
            params,
            body,
            by_ref_return,
            return_type,
            class: RefCell::new(Weak::new()),
            statics: RefCell::new(IndexMap::default()),
            loc,
        }))
    }

    /// Anonymous function expression; the `function` keyword is consumed.
    pub(crate) fn compile_closure(&mut self, loc: Loc) -> Result<Node, CompileError> {
        let by_ref_return = if self.peek().is_punct('&') {
            self.next();
            true
        } else {
            false
        };
        self.expect_punct('(')?;
        let params = self.compile_params()?;

        let mut uses = Vec::new();
        if self.peek().kind == TokenKind::KwUse {
            self.next();
            self.expect_punct('(')?;
            loop {
                let item = self.next();
                let by_ref = item.is_punct('&');
                let var = if by_ref { self.expect_variable()? } else {
                    if item.kind != TokenKind::Variable {
                        return Err(item.unexpected("variable"));
                    }
                    item
                };
                uses.push(CaptureSpec {
                    name: Rc::from(var.data.as_str()),
                    by_ref,
                });
                let sep = self.next();
                if sep.is_punct(',') {
                    continue;
                }
                if sep.is_punct(')') {
                    break;
                }
                return Err(sep.unexpected("',' or ')'"));
            }
        }

        let return_type = self.compile_return_type()?;
        self.expect_punct('{')?;
        let body = self.compile_block_body()?;
        let func = Rc::new(PhpFunction {
            name: Rc::from(""),
            params,
            body,
            by_ref_return,
            return_type,
            class: RefCell::new(Weak::new()),
            statics: RefCell::new(IndexMap::default()),
            loc: loc.clone(),
        });
        Ok(Node::new(NodeKind::Closure { func, uses }, loc))
    }

    /// Parameters after a consumed `(`: `[type] [&] [...] $name [= default]`.
    pub(crate) fn compile_params(&mut self) -> Result<Vec<Param>, CompileError> {
        let mut params: Vec<Param> = Vec::new();
        if self.peek().is_punct(')') {
            self.next();
            return Ok(params);
        }
        loop {
            let type_hint = self.compile_type_hint()?;

            let by_ref = if self.peek().is_punct('&') {
                self.next();
                true
            } else {
                false
            };
            let variadic = if self.peek().kind == TokenKind::Ellipsis {
                self.next();
                true
            } else {
                false
            };

            let var = self.expect_variable()?;
            if params.iter().any(|p| &*p.name == var.data.as_str()) {
                return Err(CompileError::new(
                    format!("redefinition of parameter ${}", var.data),
                    var.loc,
                ));
            }

            let default = if self.peek().is_punct('=') {
                self.next();
                let expr = self.compile_expr(0)?;
                Some(Rc::new(Delayed::new(expr)))
            } else {
                None
            };

            params.push(Param {
                name: Rc::from(var.data.as_str()),
                type_hint,
                default,
                by_ref,
                variadic,
            });

            let sep = self.next();
            if sep.is_punct(',') {
                continue;
            }
            if sep.is_punct(')') {
                return Ok(params);
            }
            return Err(sep.unexpected("',' or ')'"));
        }
    }

    /// Optional type hint before a parameter variable. Hints are recorded
    /// textually; they do not participate in dispatch.
    fn compile_type_hint(&mut self) -> Result<Option<Rc<str>>, CompileError> {
        let item = self.peek();
        match item.kind {
            TokenKind::Punct('?') => {
                self.next();
                let name = self.read_class_name()?;
                Ok(Some(Rc::from(format!("?{name}").as_str())))
            }
            TokenKind::Identifier | TokenKind::NsSeparator | TokenKind::KwArray => {
                let name = self.read_class_name()?;
                Ok(Some(Rc::from(name.as_str())))
            }
            _ => Ok(None),
        }
    }

    /// Optional `: type` after the parameter list.
    pub(crate) fn compile_return_type(&mut self) -> Result<Option<Rc<str>>, CompileError> {
        if !self.peek().is_punct(':') {
            return Ok(None);
        }
        self.next();
        let nullable = if self.peek().is_punct('?') {
            self.next();
            true
        } else {
            false
        };
        let name = self.read_class_name()?;
        Ok(Some(if nullable {
            Rc::from(format!("?{name}").as_str())
        } else {
            Rc::from(name.as_str())
        }))
    }
}
