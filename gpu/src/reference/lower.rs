//! Name resolution and control-flow lowering.
//!
//! Turns a parsed [`KernelDef`] into a flat instruction list over numbered
//! slots. Every declaration site gets its own slot, `$LOCAL` arrays become
//! per-group shared buffers, placeholders resolve to work-item builtins or
//! intrinsics, and `while`/`for`/`if` lower to conditional jumps.

use fxhash::FxHashMap;
use symbolic::NumericType;

use super::syntax::{self, AssignOp, BinOp, Init, KernelDef, Qualifier, Stmt, TypeSpec};
use crate::codegen::keywords;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Size,
    Buffer(NumericType),
    Scalar(TypeSpec),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub kind: ParamKind,
}

/// Private storage of one work-item: a scalar, a vector or an array of them.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotDecl {
    pub name: String,
    pub ty: TypeSpec,
    pub dims: Vec<usize>,
}

impl SlotDecl {
    pub fn len(&self) -> usize {
        self.dims.iter().product()
    }
}

/// A `$LOCAL` array shared by a work-group.
#[derive(Debug, Clone, PartialEq)]
pub struct SharedDecl {
    pub name: String,
    pub dtype: NumericType,
    pub len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    GroupIdx(usize),
    LocalIdx(usize),
    GlobalIdx(usize),
    GlobalSize(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intrinsic {
    Min,
    Max,
    Mad,
    VLoad(usize),
    VStore(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(i64),
    Slot(usize),
    /// Array element with one index per declared extent.
    Element(usize, Vec<Expr>),
    /// Pointer to the start of a shared array.
    Shared(usize),
    Builtin(Builtin),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Select(Box<Expr>, Box<Expr>, Box<Expr>),
    Cast(TypeSpec, Box<Expr>),
    /// Pointer dereference `base[index]`.
    Index(Box<Expr>, Box<Expr>),
    Call(Intrinsic, Vec<Expr>),
    Lane(Box<Expr>, usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// (Re)initialize a slot; `None` zero-fills it.
    Declare { slot: usize, init: Option<Expr> },
    Assign { target: Expr, op: AssignOp, value: Expr },
    Eval(Expr),
    JumpUnless { cond: Expr, target: usize },
    Jump(usize),
    Barrier,
    Return,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Kernel {
    pub name: String,
    /// Parameters occupy the first `params.len()` slots.
    pub params: Vec<Param>,
    pub slots: Vec<SlotDecl>,
    pub shared: Vec<SharedDecl>,
    pub code: Vec<Op>,
}

#[derive(Debug, Clone, Copy)]
enum Binding {
    Slot(usize),
    Shared(usize),
}

struct Lowering {
    name: String,
    scopes: Vec<FxHashMap<String, Binding>>,
    slots: Vec<SlotDecl>,
    shared: Vec<SharedDecl>,
    code: Vec<Op>,
}

/// Resolve and flatten one kernel definition.
pub fn lower(def: &KernelDef) -> Result<Kernel, String> {
    let mut cx = Lowering {
        name: def.name.clone(),
        scopes: vec![FxHashMap::default()],
        slots: Vec::new(),
        shared: Vec::new(),
        code: Vec::new(),
    };
    let mut params = Vec::with_capacity(def.params.len());
    for (ty, name) in &def.params {
        let kind = match ty {
            TypeSpec { size: true, .. } => ParamKind::Size,
            TypeSpec {
                qualifier: Qualifier::Global,
                pointer: true,
                scalar,
                width: 1,
                ..
            } => ParamKind::Buffer(*scalar),
            TypeSpec {
                qualifier: Qualifier::Private,
                pointer: false,
                ..
            } => ParamKind::Scalar(*ty),
            _ => return Err(cx.error(format!("unsupported parameter `{}`", name))),
        };
        cx.bind_slot(name, *ty, Vec::new())?;
        params.push(Param {
            name: name.clone(),
            kind,
        });
    }
    cx.block(&def.body)?;
    Ok(Kernel {
        name: cx.name,
        params,
        slots: cx.slots,
        shared: cx.shared,
        code: cx.code,
    })
}

impl Lowering {
    fn error(&self, message: String) -> String {
        format!("in `{}`: {}", self.name, message)
    }

    fn lookup(&self, name: &str) -> Result<Binding, String> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
            .ok_or_else(|| self.error(format!("undeclared name `{}`", name)))
    }

    fn declare(&mut self, name: &str, binding: Binding) -> Result<(), String> {
        let scope = self.scopes.len() - 1;
        if self.scopes[scope].contains_key(name) {
            return Err(self.error(format!("`{}` declared twice in one scope", name)));
        }
        self.scopes[scope].insert(name.to_string(), binding);
        Ok(())
    }

    fn bind_slot(&mut self, name: &str, ty: TypeSpec, dims: Vec<usize>) -> Result<usize, String> {
        let slot = self.slots.len();
        self.declare(name, Binding::Slot(slot))?;
        self.slots.push(SlotDecl {
            name: name.to_string(),
            ty,
            dims,
        });
        Ok(slot)
    }

    fn scoped<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, String>) -> Result<T, String> {
        self.scopes.push(FxHashMap::default());
        let out = f(self);
        self.scopes.pop();
        out
    }

    fn block(&mut self, stmts: &[Stmt]) -> Result<(), String> {
        stmts.iter().try_for_each(|s| self.stmt(s))
    }

    /// Emit a forward jump whose target is patched later.
    fn jump_unless(&mut self, cond: Expr) -> usize {
        self.code.push(Op::JumpUnless {
            cond,
            target: usize::MAX,
        });
        self.code.len() - 1
    }

    fn patch(&mut self, at: usize) {
        let here = self.code.len();
        if let Some(Op::JumpUnless { target, .. }) = self.code.get_mut(at) {
            *target = here;
        }
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<(), String> {
        match stmt {
            Stmt::Block(body) => self.scoped(|cx| cx.block(body)),
            Stmt::Decl(decl) => self.declaration(decl),
            Stmt::Assign(target, op, value) => {
                let target = self.expr(target)?;
                if !assignable(&target) {
                    return Err(self.error("assignment to a non-assignable expression".to_string()));
                }
                let value = self.expr(value)?;
                self.code.push(Op::Assign {
                    target,
                    op: *op,
                    value,
                });
                Ok(())
            }
            Stmt::Expr(e) => {
                let e = self.expr(e)?;
                self.code.push(Op::Eval(e));
                Ok(())
            }
            Stmt::While(cond, body) => {
                let top = self.code.len();
                let cond = self.expr(cond)?;
                let exit = self.jump_unless(cond);
                self.scoped(|cx| cx.stmt(body))?;
                self.code.push(Op::Jump(top));
                self.patch(exit);
                Ok(())
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
            } => self.scoped(|cx| {
                cx.stmt(init)?;
                let top = cx.code.len();
                let cond = cx.expr(cond)?;
                let exit = cx.jump_unless(cond);
                cx.scoped(|cx| cx.stmt(body))?;
                cx.stmt(step)?;
                cx.code.push(Op::Jump(top));
                cx.patch(exit);
                Ok(())
            }),
            Stmt::If(cond, body) => {
                let cond = self.expr(cond)?;
                let skip = self.jump_unless(cond);
                self.scoped(|cx| cx.stmt(body))?;
                self.patch(skip);
                Ok(())
            }
            Stmt::Return => {
                self.code.push(Op::Return);
                Ok(())
            }
            Stmt::Barrier => {
                self.code.push(Op::Barrier);
                Ok(())
            }
        }
    }

    fn declaration(&mut self, decl: &syntax::Decl) -> Result<(), String> {
        let ty = decl.ty;
        if ty.qualifier == Qualifier::Local {
            if ty.pointer || ty.width != 1 || decl.dims.is_empty() || decl.init.is_some() {
                return Err(self.error(format!(
                    "local `{}` must be an uninitialized scalar array",
                    decl.name
                )));
            }
            let index = self.shared.len();
            self.declare(&decl.name, Binding::Shared(index))?;
            self.shared.push(SharedDecl {
                name: decl.name.clone(),
                dtype: ty.scalar,
                len: decl.dims.iter().product(),
            });
            return Ok(());
        }
        // the initializer sees the enclosing scope, not the new name
        let init = match &decl.init {
            Some(Init::Expr(e)) if decl.dims.is_empty() => Some(self.expr(e)?),
            Some(Init::Expr(_)) => {
                return Err(self.error(format!("array `{}` needs a brace initializer", decl.name)))
            }
            Some(Init::Zero) | None => None,
        };
        let slot = self.bind_slot(&decl.name, ty, decl.dims.clone())?;
        self.code.push(Op::Declare { slot, init });
        Ok(())
    }

    fn expr(&mut self, e: &syntax::Expr) -> Result<Expr, String> {
        Ok(match e {
            syntax::Expr::Int(v) => Expr::Const(*v),
            syntax::Expr::Name(name) => match self.lookup(name)? {
                Binding::Shared(index) => Expr::Shared(index),
                Binding::Slot(slot) if self.slots[slot].dims.is_empty() => Expr::Slot(slot),
                Binding::Slot(_) => {
                    return Err(self.error(format!("array `{}` used without an index", name)))
                }
            },
            syntax::Expr::Placeholder(name) => Expr::Builtin(self.builtin(name)?),
            syntax::Expr::Binary(op, lhs, rhs) => {
                Expr::Binary(*op, Box::new(self.expr(lhs)?), Box::new(self.expr(rhs)?))
            }
            syntax::Expr::Neg(inner) => Expr::Neg(Box::new(self.expr(inner)?)),
            syntax::Expr::Ternary(cond, then, otherwise) => Expr::Select(
                Box::new(self.expr(cond)?),
                Box::new(self.expr(then)?),
                Box::new(self.expr(otherwise)?),
            ),
            syntax::Expr::Cast(ty, inner) => Expr::Cast(*ty, Box::new(self.expr(inner)?)),
            syntax::Expr::Index(..) => self.index_chain(e)?,
            syntax::Expr::Call(name, args) => self.call(name, args)?,
        })
    }

    /// `a[i][j]...`: the leading indices address an array slot's elements,
    /// any further ones dereference the pointer found there.
    fn index_chain(&mut self, e: &syntax::Expr) -> Result<Expr, String> {
        let mut indices = Vec::new();
        let mut base = e;
        while let syntax::Expr::Index(inner, index) = base {
            indices.push(index.as_ref());
            base = inner;
        }
        indices.reverse();

        let array = match base {
            syntax::Expr::Name(name) => match self.lookup(name)? {
                Binding::Slot(slot) if !self.slots[slot].dims.is_empty() => Some((slot, name)),
                _ => None,
            },
            _ => None,
        };
        let (mut out, rest) = match array {
            Some((slot, name)) => {
                let rank = self.slots[slot].dims.len();
                if indices.len() < rank {
                    return Err(self.error(format!("array `{}` indexed {} of {} times", name, indices.len(), rank)));
                }
                let element = indices[..rank]
                    .iter()
                    .map(|i| self.expr(i))
                    .collect::<Result<Vec<_>, _>>()?;
                (Expr::Element(slot, element), &indices[rank..])
            }
            None => (self.expr(base)?, &indices[..]),
        };
        for index in rest {
            out = Expr::Index(Box::new(out), Box::new(self.expr(index)?));
        }
        Ok(out)
    }

    fn builtin(&self, name: &str) -> Result<Builtin, String> {
        let dim = name
            .rsplit('_')
            .next()
            .and_then(|d| d.parse::<usize>().ok())
            .filter(|d| *d < 3);
        let builtin = match (keywords::stem(name), dim) {
            (Some("$GROUP_IDX"), Some(d)) => Builtin::GroupIdx(d),
            (Some("$LOCAL_IDX"), Some(d)) => Builtin::LocalIdx(d),
            (Some("$GLOBAL_IDX"), Some(d)) => Builtin::GlobalIdx(d),
            (Some("$GLOBAL_SIZE"), Some(d)) => Builtin::GlobalSize(d),
            _ => return Err(self.error(format!("unknown placeholder `{}`", name))),
        };
        Ok(builtin)
    }

    fn call(&mut self, name: &str, args: &[syntax::Expr]) -> Result<Expr, String> {
        let width = || {
            name.trim_start_matches(|c: char| !c.is_ascii_digit())
                .parse::<usize>()
                .ok()
                .filter(|w| *w > 0)
        };
        let (intrinsic, arity) = match (name, keywords::stem(name)) {
            ("min", _) => (Intrinsic::Min, 2),
            ("max", _) => (Intrinsic::Max, 2),
            (_, Some("$MAD")) => (Intrinsic::Mad, 3),
            (_, Some("$VLOAD")) => match width() {
                Some(w) => (Intrinsic::VLoad(w), 1),
                None => return Err(self.error(format!("`{}` has no width", name))),
            },
            (_, Some("$VSTORE")) => match width() {
                Some(w) => (Intrinsic::VStore(w), 2),
                None => return Err(self.error(format!("`{}` has no width", name))),
            },
            (_, Some("$LANE")) => {
                return match args {
                    [vector, syntax::Expr::Int(lane)] => {
                        let lane = usize::try_from(*lane)
                            .map_err(|_| self.error(format!("negative lane {}", lane)))?;
                        Ok(Expr::Lane(Box::new(self.expr(vector)?), lane))
                    }
                    _ => Err(self.error("`$LANE` takes a vector and a literal lane".to_string())),
                };
            }
            _ => return Err(self.error(format!("unknown function `{}`", name))),
        };
        if args.len() != arity {
            return Err(self.error(format!(
                "`{}` takes {} arguments, got {}",
                name,
                arity,
                args.len()
            )));
        }
        let args = args.iter().map(|a| self.expr(a)).collect::<Result<_, _>>()?;
        Ok(Expr::Call(intrinsic, args))
    }
}

fn assignable(e: &Expr) -> bool {
    match e {
        Expr::Slot(_) | Expr::Element(..) | Expr::Index(..) => true,
        Expr::Lane(inner, _) => assignable(inner),
        _ => false,
    }
}
