//! Class, interface and trait declarations.

use std::{cell::RefCell, rc::Rc};

use crate::{
    class::{Class, ClassKind, ClassModifiers, Delayed, MemberModifiers, Method, MethodBody, Prop, Visibility},
    compiler::Compiler,
    error::CompileError,
    node::{ClassDeclStmt, Node, NodeKind},
    token::TokenKind,
};

impl Compiler {
    /// A class-like declaration, starting at its (optional) modifiers.
    pub(crate) fn compile_class_decl(&mut self) -> Result<Node, CompileError> {
        let mut modifiers = ClassModifiers::default();
        let (kind, loc) = loop {
            let item = self.next();
            match item.kind {
                TokenKind::KwAbstract => modifiers.is_abstract = true,
                TokenKind::KwFinal => modifiers.is_final = true,
                TokenKind::KwClass => break (ClassKind::Class, item.loc),
                TokenKind::KwInterface => break (ClassKind::Interface, item.loc),
                TokenKind::KwTrait => break (ClassKind::Trait, item.loc),
                _ => return Err(item.unexpected("'class', 'interface' or 'trait'")),
            }
        };

        let name_item = self.expect_identifier()?;
        let full_name = if self.namespace_name().is_empty() {
            name_item.data.clone()
        } else {
            format!("{}\\{}", self.namespace_name(), name_item.data)
        };

        let mut class = Class::new(Rc::from(full_name.as_str()), kind, loc.clone());
        class.modifiers = modifiers;

        // header: extends / implements
        let item = self.next();
        match item.kind {
            TokenKind::KwExtends => {
                let mut names = vec![self.read_resolved_class_name()?];
                while self.peek().is_punct(',') {
                    self.next();
                    names.push(self.read_resolved_class_name()?);
                }
                match kind {
                    ClassKind::Interface => class.interface_names.extend(names),
                    _ => {
                        if names.len() > 1 {
                            return Err(CompileError::new("a class can only extend one class", loc));
                        }
                        class.parent_name = names.pop();
                    }
                }
            }
            _ => self.backup(),
        }
        let item = self.next();
        if item.kind == TokenKind::KwImplements {
            loop {
                class.interface_names.push(self.read_resolved_class_name()?);
                if self.peek().is_punct(',') {
                    self.next();
                } else {
                    break;
                }
            }
        } else {
            self.backup();
        }

        self.expect_punct('{')?;
        self.compile_class_body(&mut class)?;

        // the constructor is `__construct`, or a method named like the class
        let base_lower = class.base_name().to_ascii_lowercase();
        class.constructor = class
            .methods
            .get("__construct")
            .or_else(|| class.methods.get(base_lower.as_str()))
            .cloned();

        Ok(Node::new(
            NodeKind::ClassDecl(Rc::new(ClassDeclStmt {
                class: Rc::new(class),
                executed: RefCell::new(false),
            })),
            loc,
        ))
    }

    fn read_resolved_class_name(&mut self) -> Result<Rc<str>, CompileError> {
        let raw = self.read_class_name()?;
        Ok(Rc::from(self.resolve_class_name(&raw).as_str()))
    }

    fn compile_class_body(&mut self, class: &mut Class) -> Result<(), CompileError> {
        loop {
            let item = self.next();
            if item.is_punct('}') {
                return Ok(());
            }
            if item.is_eof() {
                return Err(item.unexpected("'}'"));
            }
            self.backup();

            let member_modifiers = self.compile_member_modifiers();
            let item = self.next();
            match item.kind {
                TokenKind::Variable => {
                    self.backup();
                    self.compile_property_list(class, member_modifiers)?;
                }
                TokenKind::KwConst => self.compile_class_consts(class)?,
                TokenKind::KwFunction => {
                    let (by_ref, name_item) = {
                        let next = self.next();
                        if next.is_punct('&') {
                            (true, self.expect_identifier()?)
                        } else if next.kind == TokenKind::Identifier {
                            (false, next)
                        } else {
                            return Err(next.unexpected("method name"));
                        }
                    };
                    let func = self.compile_function_rest(name_item.loc.clone(), &name_item.data, by_ref)?;
                    let method = Rc::new(Method {
                        name: Rc::from(name_item.data.as_str()),
                        modifiers: member_modifiers,
                        body: MethodBody::Php(func),
                    });
                    let lower = name_item.data.to_ascii_lowercase();
                    if class.methods.insert(Rc::from(lower.as_str()), method).is_some() {
                        return Err(CompileError::new(
                            format!("Cannot redeclare method {}::{}", class.name, name_item.data),
                            name_item.loc,
                        ));
                    }
                }
                TokenKind::KwUse => {
                    return Err(CompileError::new(
                        "trait composition inside class bodies is not supported",
                        item.loc,
                    ));
                }
                _ => return Err(item.unexpected("property, constant or method")),
            }
        }
    }

    fn compile_member_modifiers(&mut self) -> MemberModifiers {
        let mut modifiers = MemberModifiers::default();
        loop {
            let item = self.next();
            match item.kind {
                TokenKind::KwPublic | TokenKind::KwVar => modifiers.visibility = Visibility::Public,
                TokenKind::KwProtected => modifiers.visibility = Visibility::Protected,
                TokenKind::KwPrivate => modifiers.visibility = Visibility::Private,
                TokenKind::KwStatic => modifiers.is_static = true,
                TokenKind::KwAbstract => modifiers.is_abstract = true,
                TokenKind::KwFinal => modifiers.is_final = true,
                TokenKind::KwReadonly => modifiers.is_readonly = true,
                _ => {
                    self.backup();
                    return modifiers;
                }
            }
        }
    }

    /// `$a = expr, $b, $c = expr;` — one or more properties sharing the
    /// modifier list, defaults wrapped as delayed values.
    fn compile_property_list(&mut self, class: &mut Class, modifiers: MemberModifiers) -> Result<(), CompileError> {
        loop {
            let var = self.expect_variable()?;
            let item = self.next();
            let (default, item) = if item.is_punct('=') {
                let expr = self.compile_expr(0)?;
                (Some(Rc::new(Delayed::new(expr))), self.next())
            } else {
                (None, item)
            };
            class.props.push(Prop {
                name: Rc::from(var.data.as_str()),
                modifiers,
                default,
            });
            if item.is_punct(';') {
                return Ok(());
            }
            if item.is_punct(',') {
                continue;
            }
            return Err(item.unexpected("',' or ';'"));
        }
    }

    /// `const A = expr, B = expr;` — values stored delayed so they may
    /// reference classes declared later.
    fn compile_class_consts(&mut self, class: &mut Class) -> Result<(), CompileError> {
        loop {
            let name = self.expect_identifier()?;
            self.expect_punct('=')?;
            let expr = self.compile_expr(0)?;
            if class
                .consts
                .insert(Rc::from(name.data.as_str()), Rc::new(Delayed::new(expr)))
                .is_some()
            {
                return Err(CompileError::new(
                    format!("Cannot redefine class constant {}::{}", class.name, name.data),
                    name.loc,
                ));
            }
            let sep = self.next();
            if sep.is_punct(';') {
                return Ok(());
            }
            if sep.is_punct(',') {
                continue;
            }
            return Err(sep.unexpected("',' or ';'"));
        }
    }
}
