//! Work-group interpreter for lowered kernels.
//!
//! Each work-group gets fresh shared arrays and one [`WorkItem`] per local
//! id. Items run in phases: every live item executes until it reaches a
//! barrier or finishes, then the group checks that all of them stopped at
//! the same barrier before releasing it. Global, shared and private array
//! accesses are all bounds-checked.

use smallvec::SmallVec;
use symbolic::NumericType;

use super::lower::{Builtin, Expr, Intrinsic, Kernel, Op, ParamKind};
use super::syntax::{AssignOp, BinOp, TypeSpec};
use super::{narrow, HostMemory};
use crate::backend::{BufferHandle, KernelArg, LaunchError, NdRange};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Space {
    Null,
    Global(BufferHandle),
    Local(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pointer {
    pub space: Space,
    pub offset: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Real(f64),
    Vector(SmallVec<[f64; 4]>),
    Ptr(Pointer),
}

impl Value {
    fn zero(ty: &TypeSpec) -> Value {
        if ty.pointer {
            Value::Ptr(Pointer {
                space: Space::Null,
                offset: 0,
            })
        } else if ty.width > 1 {
            Value::Vector(SmallVec::from_elem(0.0, ty.width as usize))
        } else if ty.scalar.is_floating() {
            Value::Real(0.0)
        } else {
            Value::Int(0)
        }
    }

    fn from_element(dtype: NumericType, v: f64) -> Value {
        if dtype.is_floating() {
            Value::Real(v)
        } else {
            Value::Int(v as i64)
        }
    }

    fn truthy(&self) -> bool {
        match self {
            Value::Int(v) => *v != 0,
            Value::Real(v) => *v != 0.0,
            Value::Vector(v) => v.iter().any(|x| *x != 0.0),
            Value::Ptr(p) => p.space != Space::Null,
        }
    }
}

/// Narrow `v` to what a variable of type `ty` holds.
fn convert(ty: &TypeSpec, v: Value) -> Result<Value, String> {
    if ty.pointer {
        return match v {
            Value::Ptr(p) => Ok(Value::Ptr(p)),
            Value::Int(0) => Ok(Value::zero(ty)),
            other => Err(format!("cannot store {:?} in a pointer", other)),
        };
    }
    let scalar = |x: f64| narrow(ty.scalar, x);
    let width = ty.width as usize;
    match v {
        Value::Ptr(_) => Err("cannot store a pointer in a value".to_string()),
        Value::Vector(lanes) if width > 1 && lanes.len() == width => {
            Ok(Value::Vector(lanes.into_iter().map(scalar).collect()))
        }
        Value::Vector(lanes) => Err(format!(
            "cannot store a {}-lane vector in a {}-lane value",
            lanes.len(),
            width
        )),
        Value::Int(x) if width > 1 => Ok(Value::Vector(SmallVec::from_elem(scalar(x as f64), width))),
        Value::Real(x) if width > 1 => Ok(Value::Vector(SmallVec::from_elem(scalar(x), width))),
        Value::Int(x) if ty.scalar.is_floating() => Ok(Value::Real(scalar(x as f64))),
        Value::Real(x) if ty.scalar.is_floating() => Ok(Value::Real(scalar(x))),
        Value::Int(x) => Ok(Value::Int(match ty.scalar {
            NumericType::Int32 => x as i32 as i64,
            _ => x,
        })),
        Value::Real(x) => Ok(Value::Int(scalar(x.trunc()) as i64)),
    }
}

fn binary(op: BinOp, lhs: Value, rhs: Value) -> Result<Value, String> {
    use Value::{Int, Ptr, Real};
    let compare = |ord: Option<std::cmp::Ordering>| {
        let holds = ord.is_some_and(|o| match op {
            BinOp::Lt => o.is_lt(),
            BinOp::Le => o.is_le(),
            BinOp::Gt => o.is_gt(),
            BinOp::Ge => o.is_ge(),
            BinOp::Eq => o.is_eq(),
            _ => o.is_ne(),
        });
        Int(holds as i64)
    };
    Ok(match (lhs, rhs) {
        (Int(a), Int(b)) => match op {
            BinOp::Add => Int(a.wrapping_add(b)),
            BinOp::Sub => Int(a.wrapping_sub(b)),
            BinOp::Mul => Int(a.wrapping_mul(b)),
            BinOp::Div => Int(a.checked_div(b).ok_or("integer division by zero")?),
            BinOp::Rem => Int(a.checked_rem(b).ok_or("integer remainder by zero")?),
            _ => compare(Some(a.cmp(&b))),
        },
        (Ptr(p), Int(d)) if matches!(op, BinOp::Add | BinOp::Sub) => {
            let d = if op == BinOp::Add { d } else { d.wrapping_neg() };
            Ptr(Pointer {
                space: p.space,
                offset: p.offset.wrapping_add(d),
            })
        }
        (Int(d), Ptr(p)) if op == BinOp::Add => Ptr(Pointer {
            space: p.space,
            offset: p.offset.wrapping_add(d),
        }),
        (lhs @ (Int(_) | Real(_)), rhs @ (Int(_) | Real(_))) => {
            let (a, b) = (as_real(&lhs), as_real(&rhs));
            match op {
                BinOp::Add => Real(a + b),
                BinOp::Sub => Real(a - b),
                BinOp::Mul => Real(a * b),
                BinOp::Div => Real(a / b),
                BinOp::Rem => return Err("`%` applied to a floating-point value".to_string()),
                _ => compare(a.partial_cmp(&b)),
            }
        }
        (lhs, rhs) => {
            return Err(format!(
                "unsupported operands {:?} {} {:?}",
                lhs,
                op.symbol(),
                rhs
            ))
        }
    })
}

fn as_real(v: &Value) -> f64 {
    match v {
        Value::Int(x) => *x as f64,
        Value::Real(x) => *x,
        _ => f64::NAN,
    }
}

fn as_int(v: &Value) -> Result<i64, String> {
    match v {
        Value::Int(x) => Ok(*x),
        other => Err(format!("expected an integer, found {:?}", other)),
    }
}

/// Bind launch arguments to the kernel's parameter slots.
pub(super) fn bind(kernel: &Kernel, args: &[KernelArg], memory: &HostMemory) -> Result<Vec<Value>, LaunchError> {
    if args.len() != kernel.params.len() {
        return Err(LaunchError::ArgumentCount {
            kernel: kernel.name.clone(),
            expected: kernel.params.len(),
            found: args.len(),
        });
    }
    let mismatch = |index: usize, expected: &'static str| LaunchError::ArgumentType {
        kernel: kernel.name.clone(),
        index,
        expected,
    };
    kernel
        .params
        .iter()
        .zip(args)
        .enumerate()
        .map(|(index, (param, arg))| match (param.kind, arg) {
            (ParamKind::Size, KernelArg::Size(v)) => i64::try_from(*v)
                .map(Value::Int)
                .map_err(|_| mismatch(index, "size")),
            (ParamKind::Size, _) => Err(mismatch(index, "size")),
            (ParamKind::Buffer(dtype), KernelArg::Buffer(handle)) => {
                if memory.dtype(*handle)? != dtype {
                    return Err(mismatch(index, "buffer"));
                }
                Ok(Value::Ptr(Pointer {
                    space: Space::Global(*handle),
                    offset: 0,
                }))
            }
            (ParamKind::Buffer(_), _) => Err(mismatch(index, "buffer")),
            (ParamKind::Scalar(ty), KernelArg::Scalar(v)) => {
                convert(&ty, Value::Real(v.as_f64())).map_err(|_| mismatch(index, "scalar"))
            }
            (ParamKind::Scalar(_), _) => Err(mismatch(index, "scalar")),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Running,
    /// Stopped at the barrier at this pc.
    Waiting(usize),
    Done,
}

struct WorkItem {
    lid: [usize; 3],
    slots: Vec<Vec<Value>>,
    pc: usize,
    steps: u64,
    state: State,
}

/// A storage location an assignment can write.
#[derive(Debug, Clone)]
enum Place {
    Slot(usize, usize),
    Memory(Pointer),
    Lane(Box<Place>, usize),
}

struct Group<'a> {
    kernel: &'a Kernel,
    memory: &'a mut HostMemory,
    range: &'a NdRange,
    group: [usize; 3],
    shared: Vec<Vec<f64>>,
    step_limit: u64,
}

/// Run `kernel` over every work-group of `range`.
pub(super) fn execute(
    kernel: &Kernel,
    params: &[Value],
    range: &NdRange,
    memory: &mut HostMemory,
    step_limit: u64,
) -> Result<(), LaunchError> {
    let groups = range.groups();
    for g2 in 0..groups[2] {
        for g1 in 0..groups[1] {
            for g0 in 0..groups[0] {
                let mut group = Group {
                    kernel,
                    memory: &mut *memory,
                    range,
                    group: [g0, g1, g2],
                    shared: kernel.shared.iter().map(|s| vec![0.0; s.len]).collect(),
                    step_limit,
                };
                group.run(params)?;
            }
        }
    }
    Ok(())
}

impl<'a> Group<'a> {
    fn fault(&self, message: impl Into<String>) -> LaunchError {
        LaunchError::Execution {
            kernel: self.kernel.name.clone(),
            message: message.into(),
        }
    }

    fn run(&mut self, params: &[Value]) -> Result<(), LaunchError> {
        let local = self.range.local;
        let mut items = Vec::with_capacity(local.iter().product());
        for l2 in 0..local[2] {
            for l1 in 0..local[1] {
                for l0 in 0..local[0] {
                    let slots = self
                        .kernel
                        .slots
                        .iter()
                        .enumerate()
                        .map(|(i, decl)| match params.get(i) {
                            Some(v) => vec![v.clone()],
                            None => vec![Value::zero(&decl.ty); decl.len()],
                        })
                        .collect();
                    items.push(WorkItem {
                        lid: [l0, l1, l2],
                        slots,
                        pc: 0,
                        steps: 0,
                        state: State::Running,
                    });
                }
            }
        }

        loop {
            for item in items.iter_mut() {
                if item.state == State::Running {
                    self.run_item(item)?;
                }
            }
            let mut barrier = None;
            let mut finished = 0;
            for item in &items {
                match item.state {
                    State::Waiting(pc) if barrier.map_or(true, |b| b == pc) => barrier = Some(pc),
                    State::Waiting(_) | State::Running => {
                        return Err(self.divergence());
                    }
                    State::Done => finished += 1,
                }
            }
            match barrier {
                None => return Ok(()),
                Some(_) if finished > 0 => return Err(self.divergence()),
                Some(pc) => {
                    for item in items.iter_mut() {
                        item.state = State::Running;
                        item.pc = pc + 1;
                    }
                }
            }
        }
    }

    fn divergence(&self) -> LaunchError {
        LaunchError::BarrierDivergence {
            kernel: self.kernel.name.clone(),
        }
    }

    /// Execute one item until it reaches a barrier or finishes.
    fn run_item(&mut self, item: &mut WorkItem) -> Result<(), LaunchError> {
        let kernel = self.kernel;
        loop {
            let Some(op) = kernel.code.get(item.pc) else {
                item.state = State::Done;
                return Ok(());
            };
            item.steps += 1;
            if item.steps > self.step_limit {
                return Err(LaunchError::StepLimit {
                    kernel: self.kernel.name.clone(),
                    limit: self.step_limit,
                });
            }
            let mut next = item.pc + 1;
            match op {
                Op::Declare { slot, init } => {
                    let decl = &kernel.slots[*slot];
                    let fresh = match init {
                        Some(e) => {
                            let v = self.eval(item, e)?;
                            vec![convert(&decl.ty, v).map_err(|m| self.fault(m))?]
                        }
                        None => vec![Value::zero(&decl.ty); decl.len()],
                    };
                    item.slots[*slot] = fresh;
                }
                Op::Assign { target, op, value } => {
                    let place = self.place(item, target)?;
                    let rhs = self.eval(item, value)?;
                    let v = match op {
                        AssignOp::Set => rhs,
                        AssignOp::Add | AssignOp::Sub | AssignOp::Mul => {
                            let bin = match op {
                                AssignOp::Add => BinOp::Add,
                                AssignOp::Sub => BinOp::Sub,
                                _ => BinOp::Mul,
                            };
                            let current = self.read(item, &place)?;
                            binary(bin, current, rhs).map_err(|m| self.fault(m))?
                        }
                    };
                    self.write(item, &place, v)?;
                }
                Op::Eval(e) => {
                    self.eval(item, e)?;
                }
                Op::JumpUnless { cond, target } => {
                    if !self.eval(item, cond)?.truthy() {
                        next = *target;
                    }
                }
                Op::Jump(target) => next = *target,
                Op::Barrier => {
                    item.state = State::Waiting(item.pc);
                    return Ok(());
                }
                Op::Return => {
                    item.state = State::Done;
                    return Ok(());
                }
            }
            item.pc = next;
        }
    }

    fn builtin(&self, item: &WorkItem, b: Builtin) -> i64 {
        let local = self.range.local;
        let v = match b {
            Builtin::GroupIdx(d) => self.group[d],
            Builtin::LocalIdx(d) => item.lid[d],
            Builtin::GlobalIdx(d) => self.group[d] * local[d] + item.lid[d],
            Builtin::GlobalSize(d) => self.range.global[d],
        };
        v as i64
    }

    fn eval(&mut self, item: &WorkItem, e: &Expr) -> Result<Value, LaunchError> {
        Ok(match e {
            Expr::Const(v) => Value::Int(*v),
            Expr::Slot(_) | Expr::Element(..) | Expr::Index(..) | Expr::Lane(..) => {
                let place = self.place(item, e)?;
                self.read(item, &place)?
            }
            Expr::Shared(index) => Value::Ptr(Pointer {
                space: Space::Local(*index),
                offset: 0,
            }),
            Expr::Builtin(b) => Value::Int(self.builtin(item, *b)),
            Expr::Binary(op, lhs, rhs) => {
                let lhs = self.eval(item, lhs)?;
                let rhs = self.eval(item, rhs)?;
                binary(*op, lhs, rhs).map_err(|m| self.fault(m))?
            }
            Expr::Neg(inner) => match self.eval(item, inner)? {
                Value::Int(v) => Value::Int(v.wrapping_neg()),
                Value::Real(v) => Value::Real(-v),
                other => return Err(self.fault(format!("cannot negate {:?}", other))),
            },
            // only the chosen branch is evaluated
            Expr::Select(cond, then, otherwise) => {
                if self.eval(item, cond)?.truthy() {
                    self.eval(item, then)?
                } else {
                    self.eval(item, otherwise)?
                }
            }
            Expr::Cast(ty, inner) => {
                let v = self.eval(item, inner)?;
                convert(ty, v).map_err(|m| self.fault(m))?
            }
            Expr::Call(intrinsic, args) => self.call(item, *intrinsic, args)?,
        })
    }

    fn call(&mut self, item: &WorkItem, intrinsic: Intrinsic, args: &[Expr]) -> Result<Value, LaunchError> {
        let mut values = Vec::with_capacity(args.len());
        for a in args {
            values.push(self.eval(item, a)?);
        }
        match (intrinsic, values.as_slice()) {
            (Intrinsic::Min, [Value::Int(a), Value::Int(b)]) => Ok(Value::Int(*a.min(b))),
            (Intrinsic::Max, [Value::Int(a), Value::Int(b)]) => Ok(Value::Int(*a.max(b))),
            (Intrinsic::Min, [a, b]) => Ok(Value::Real(as_real(a).min(as_real(b)))),
            (Intrinsic::Max, [a, b]) => Ok(Value::Real(as_real(a).max(as_real(b)))),
            (Intrinsic::Mad, [Value::Int(a), Value::Int(b), Value::Int(c)]) => {
                Ok(Value::Int(a.wrapping_mul(*b).wrapping_add(*c)))
            }
            (Intrinsic::Mad, [a, b, c]) => Ok(Value::Real(as_real(a).mul_add(as_real(b), as_real(c)))),
            (Intrinsic::VLoad(width), [Value::Ptr(p)]) => {
                let mut lanes = SmallVec::with_capacity(width);
                for s in 0..width as i64 {
                    lanes.push(self.load(*p, s)?.1);
                }
                Ok(Value::Vector(lanes))
            }
            (Intrinsic::VStore(width), [Value::Vector(lanes), Value::Ptr(p)]) if lanes.len() == width => {
                for (s, lane) in lanes.iter().enumerate() {
                    self.store(*p, s as i64, *lane)?;
                }
                Ok(Value::Int(0))
            }
            (intrinsic, values) => Err(self.fault(format!(
                "bad operands for {:?}: {:?}",
                intrinsic, values
            ))),
        }
    }

    /// Resolve an assignable expression to a location.
    fn place(&mut self, item: &WorkItem, e: &Expr) -> Result<Place, LaunchError> {
        match e {
            Expr::Slot(slot) => Ok(Place::Slot(*slot, 0)),
            Expr::Element(slot, indices) => {
                let kernel = self.kernel;
                let decl = &kernel.slots[*slot];
                let mut flat = 0usize;
                for (index, extent) in indices.iter().zip(&decl.dims) {
                    let i = self.eval(item, index)?;
                    let i = as_int(&i).map_err(|m| self.fault(m))?;
                    let within = usize::try_from(i).ok().filter(|i| i < extent);
                    let Some(i) = within else {
                        return Err(LaunchError::OutOfBounds {
                            region: decl.name.clone(),
                            index: i,
                            len: *extent,
                        });
                    };
                    flat = flat * extent + i;
                }
                Ok(Place::Slot(*slot, flat))
            }
            Expr::Index(base, index) => {
                let base = self.eval(item, base)?;
                let index = self.eval(item, index)?;
                let index = as_int(&index).map_err(|m| self.fault(m))?;
                match base {
                    Value::Ptr(p) => Ok(Place::Memory(Pointer {
                        space: p.space,
                        offset: p.offset.wrapping_add(index),
                    })),
                    other => Err(self.fault(format!("cannot index {:?}", other))),
                }
            }
            Expr::Lane(inner, lane) => Ok(Place::Lane(Box::new(self.place(item, inner)?), *lane)),
            other => Err(self.fault(format!("{:?} is not a location", other))),
        }
    }

    fn read(&mut self, item: &WorkItem, place: &Place) -> Result<Value, LaunchError> {
        match place {
            Place::Slot(slot, flat) => item.slots[*slot]
                .get(*flat)
                .cloned()
                .ok_or_else(|| self.fault(format!("slot `{}` read before declaration", self.kernel.slots[*slot].name))),
            Place::Memory(p) => {
                let (dtype, v) = self.load(*p, 0)?;
                Ok(Value::from_element(dtype, v))
            }
            Place::Lane(inner, lane) => match self.read(item, inner)? {
                Value::Vector(lanes) => lanes
                    .get(*lane)
                    .map(|v| Value::Real(*v))
                    .ok_or_else(|| self.fault(format!("lane {} of a {}-lane vector", lane, lanes.len()))),
                scalar if *lane == 0 => Ok(scalar),
                other => Err(self.fault(format!("lane {} of {:?}", lane, other))),
            },
        }
    }

    fn write(&mut self, item: &mut WorkItem, place: &Place, v: Value) -> Result<(), LaunchError> {
        match place {
            Place::Slot(slot, flat) => {
                let kernel = self.kernel;
                let decl = &kernel.slots[*slot];
                let v = convert(&decl.ty, v).map_err(|m| self.fault(m))?;
                match item.slots[*slot].get_mut(*flat) {
                    Some(cell) => *cell = v,
                    None => return Err(self.fault(format!("slot `{}` written before declaration", decl.name))),
                }
                Ok(())
            }
            Place::Memory(p) => match v {
                Value::Int(x) => self.store(*p, 0, x as f64),
                Value::Real(x) => self.store(*p, 0, x),
                other => Err(self.fault(format!("cannot store {:?} to memory", other))),
            },
            Place::Lane(inner, lane) => {
                let x = match v {
                    Value::Int(x) => x as f64,
                    Value::Real(x) => x,
                    other => return Err(self.fault(format!("cannot store {:?} in a lane", other))),
                };
                match self.read(item, inner)? {
                    Value::Vector(mut lanes) if *lane < lanes.len() => {
                        lanes[*lane] = x;
                        self.write(item, inner, Value::Vector(lanes))
                    }
                    scalar if *lane == 0 && !matches!(scalar, Value::Vector(_)) => {
                        self.write(item, inner, Value::Real(x))
                    }
                    other => Err(self.fault(format!("lane {} of {:?}", lane, other))),
                }
            }
        }
    }

    /// Element `p[index]` with the element type it was read as.
    fn load(&mut self, p: Pointer, index: i64) -> Result<(NumericType, f64), LaunchError> {
        let at = p.offset.wrapping_add(index);
        match p.space {
            Space::Null => Err(self.fault("null pointer dereference")),
            Space::Global(handle) => {
                let dtype = self.memory.dtype(handle)?;
                Ok((dtype, self.memory.load(handle, at)?))
            }
            Space::Local(i) => {
                let decl = &self.kernel.shared[i];
                let buf = &self.shared[i];
                usize::try_from(at)
                    .ok()
                    .and_then(|j| buf.get(j).copied())
                    .map(|v| (decl.dtype, v))
                    .ok_or_else(|| LaunchError::OutOfBounds {
                        region: decl.name.clone(),
                        index: at,
                        len: buf.len(),
                    })
            }
        }
    }

    fn store(&mut self, p: Pointer, index: i64, v: f64) -> Result<(), LaunchError> {
        let at = p.offset.wrapping_add(index);
        match p.space {
            Space::Null => Err(self.fault("null pointer dereference")),
            Space::Global(handle) => self.memory.store(handle, at, v),
            Space::Local(i) => {
                let kernel = self.kernel;
                let decl = &kernel.shared[i];
                let buf = &mut self.shared[i];
                let len = buf.len();
                let cell = usize::try_from(at)
                    .ok()
                    .and_then(|j| buf.get_mut(j))
                    .ok_or_else(|| LaunchError::OutOfBounds {
                        region: decl.name.clone(),
                        index: at,
                        len,
                    })?;
                *cell = narrow(decl.dtype, v);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::lower::lower;
    use crate::reference::syntax::{parse_program, Qualifier};

    fn int_ty(scalar: NumericType) -> TypeSpec {
        TypeSpec {
            qualifier: Qualifier::Private,
            scalar,
            width: 1,
            pointer: false,
            size: false,
        }
    }

    #[test]
    fn test_convert_narrows() {
        let int = int_ty(NumericType::Int32);
        assert_eq!(convert(&int, Value::Int((1 << 32) | 5)), Ok(Value::Int(5)));
        assert_eq!(convert(&int, Value::Real(-2.75)), Ok(Value::Int(-2)));
        let float = int_ty(NumericType::Float32);
        assert_eq!(convert(&float, Value::Int(3)), Ok(Value::Real(3.0)));
        let vec2 = TypeSpec { width: 2, ..float };
        assert_eq!(
            convert(&vec2, Value::Real(0.5)),
            Ok(Value::Vector(SmallVec::from_slice(&[0.5, 0.5])))
        );
        assert!(convert(&vec2, Value::Vector(SmallVec::from_slice(&[1.0, 2.0, 3.0]))).is_err());
    }

    #[test]
    fn test_binary_semantics() {
        assert_eq!(binary(BinOp::Div, Value::Int(-7), Value::Int(2)), Ok(Value::Int(-3)));
        assert_eq!(binary(BinOp::Rem, Value::Int(-7), Value::Int(2)), Ok(Value::Int(-1)));
        assert!(binary(BinOp::Div, Value::Int(1), Value::Int(0)).is_err());
        assert_eq!(binary(BinOp::Add, Value::Int(1), Value::Real(0.5)), Ok(Value::Real(1.5)));
        assert_eq!(binary(BinOp::Ne, Value::Real(0.0), Value::Int(0)), Ok(Value::Int(0)));
        let p = Pointer {
            space: Space::Local(0),
            offset: 4,
        };
        assert_eq!(
            binary(BinOp::Sub, Value::Ptr(p), Value::Int(3)),
            Ok(Value::Ptr(Pointer { offset: 1, ..p }))
        );
        assert!(binary(BinOp::Mul, Value::Ptr(p), Value::Int(2)).is_err());
    }

    fn run(text: &str, range: NdRange, memory: &mut HostMemory, args: &[KernelArg]) -> Result<(), LaunchError> {
        let defs = parse_program(text).unwrap();
        let kernel = lower(&defs[0]).unwrap();
        let params = bind(&kernel, args, memory)?;
        execute(&kernel, &params, &range, memory, 10_000)
    }

    #[test]
    fn test_shared_memory_exchange() {
        // each item publishes its id, then reads its neighbour's
        let text = "$KERNEL void k($GLOBAL int* out) {\n    $LOCAL int l[4];\n    int i = $LOCAL_IDX_0;\n    l[i] = 10*$GROUP_IDX_0 + i;\n    $LOCAL_BARRIER;\n    out[$GLOBAL_IDX_0] = l[(i + 1) % 4];\n}\n";
        let mut memory = HostMemory::default();
        let out = memory.upload(NumericType::Int32, vec![0.0; 8]);
        let range = NdRange {
            global: [8, 1, 1],
            local: [4, 1, 1],
        };
        run(text, range, &mut memory, &[KernelArg::Buffer(out)]).unwrap();
        assert_eq!(
            memory.data(out).unwrap(),
            &[1.0, 2.0, 3.0, 0.0, 11.0, 12.0, 13.0, 10.0]
        );
    }

    #[test]
    fn test_divergent_barrier() {
        let text = "$KERNEL void k($SIZE_T N) {\n    if($LOCAL_IDX_0 < N) {\n        $LOCAL_BARRIER;\n    }\n    $LOCAL_BARRIER;\n}\n";
        let mut memory = HostMemory::default();
        let range = NdRange {
            global: [2, 1, 1],
            local: [2, 1, 1],
        };
        let err = run(text, range, &mut memory, &[KernelArg::Size(1)]).unwrap_err();
        assert_eq!(err, LaunchError::BarrierDivergence { kernel: "k".into() });
        // uniform condition: fine
        run(text, range, &mut memory, &[KernelArg::Size(2)]).unwrap();
    }

    #[test]
    fn test_private_array_bounds() {
        let text = "$KERNEL void k($SIZE_T N) {\n    int r[2][3];\n    r[1][N] = 1;\n}\n";
        let mut memory = HostMemory::default();
        let range = NdRange {
            global: [1, 1, 1],
            local: [1, 1, 1],
        };
        run(text, range, &mut memory, &[KernelArg::Size(2)]).unwrap();
        let err = run(text, range, &mut memory, &[KernelArg::Size(3)]).unwrap_err();
        assert_eq!(
            err,
            LaunchError::OutOfBounds {
                region: "r".into(),
                index: 3,
                len: 3,
            }
        );
    }

    #[test]
    fn test_vectors_and_lanes() {
        let text = "$KERNEL void k($GLOBAL double* p) {\n    double2 v = $VLOAD2(p + 1);\n    $LANE(v, 0) = $MAD($LANE(v, 0), 10, $LANE(v, 1));\n    $VSTORE2(v, p);\n}\n";
        let mut memory = HostMemory::default();
        let p = memory.upload(NumericType::Float64, vec![0.0, 1.0, 2.0]);
        let range = NdRange {
            global: [1, 1, 1],
            local: [1, 1, 1],
        };
        run(text, range, &mut memory, &[KernelArg::Buffer(p)]).unwrap();
        assert_eq!(memory.data(p).unwrap(), &[12.0, 2.0, 2.0]);
    }

    #[test]
    fn test_bind_checks_types() {
        let text = "$KERNEL void k($SIZE_T N, $GLOBAL float* p, float a) {\n}\n";
        let kernel = lower(&parse_program(text).unwrap()[0]).unwrap();
        let mut memory = HostMemory::default();
        let f32_buf = memory.upload(NumericType::Float32, vec![0.0]);
        let f64_buf = memory.upload(NumericType::Float64, vec![0.0]);
        let scalar = KernelArg::Scalar(symbolic::ScalarValue::F32(1.0));
        assert!(bind(&kernel, &[KernelArg::Size(1), KernelArg::Buffer(f32_buf), scalar], &memory).is_ok());
        assert_eq!(
            bind(&kernel, &[KernelArg::Size(1), KernelArg::Buffer(f64_buf), scalar], &memory),
            Err(LaunchError::ArgumentType {
                kernel: "k".into(),
                index: 1,
                expected: "buffer",
            })
        );
        assert_eq!(
            bind(&kernel, &[KernelArg::Size(1)], &memory),
            Err(LaunchError::ArgumentCount {
                kernel: "k".into(),
                expected: 3,
                found: 1,
            })
        );
    }
}
