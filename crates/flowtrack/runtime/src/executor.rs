// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Reference interpreter for the stack machine
//!
//! Runs plain and woven methods alike. Woven code talks to the provenance store only
//! through its hooks, so running a class before and after weaving gives the same
//! results; only the trackers differ.

use crate::config::ExecutorConfig;
use crate::error::{RuntimeError, RuntimeResult};
use crate::hooks::HookContext;
use crate::natives::{NativeCall, NativeRegistry};
use crate::value::{HeapObject, Value};
use flowtrack_core::Invocation;
use flowtrack_weaver::ir::{BinaryOp, Class, Constant, Insn, LabelId, Method, Type};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

pub struct Executor {
    classes: HashMap<String, Class>,
    natives: NativeRegistry,
    hooks: HookContext,
    config: ExecutorConfig,
    /// Interned string literals
    literals: Mutex<HashMap<String, Arc<HeapObject>>>,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor {
    pub fn new() -> Self {
        Self {
            classes: HashMap::new(),
            natives: NativeRegistry::with_builtins(),
            hooks: HookContext::global(),
            config: ExecutorConfig::default(),
            literals: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_hooks(mut self, hooks: HookContext) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_natives(mut self, natives: NativeRegistry) -> Self {
        self.natives = natives;
        self
    }

    pub fn hooks(&self) -> &HookContext {
        &self.hooks
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Loads `class`, replacing an already loaded class of the same name
    pub fn load_class(&mut self, class: Class) {
        debug!(class = %class.name, methods = class.methods.len(), "loaded class");
        self.classes.insert(class.name.clone(), class);
    }

    pub fn register_native<F>(&mut self, owner: &str, name: &str, desc: &str, method: F)
    where
        F: Fn(&mut NativeCall<'_>) -> RuntimeResult<Option<Value>> + Send + Sync + 'static,
    {
        self.natives.register(owner, name, desc, method);
    }

    /// The literal instance every `Const` of `text` evaluates to
    pub fn literal(&self, text: &str) -> Arc<HeapObject> {
        self.literals.lock().entry(text.to_string()).or_insert_with(|| HeapObject::string(text)).clone()
    }

    /// Calls `owner.name desc` with `args`, receiver first for instance methods
    pub fn invoke(&self, owner: &str, name: &str, desc: &str, args: Vec<Value>) -> RuntimeResult<Option<Value>> {
        let mut steps = 0;
        self.call(owner, name, desc, args, 0, &mut steps)
    }

    fn call(
        &self,
        owner: &str,
        name: &str,
        desc: &str,
        args: Vec<Value>,
        depth: usize,
        steps: &mut u64,
    ) -> RuntimeResult<Option<Value>> {
        if depth >= self.config.max_call_depth {
            return Err(RuntimeError::CallDepthExceeded(self.config.max_call_depth));
        }
        if let Some(method) = self.find_method(owner, name, desc) {
            return self.run(method, args, depth, steps);
        }
        let key = NativeRegistry::key(owner, name, desc);
        let native = self.natives.get(owner, name, desc).ok_or_else(|| RuntimeError::UnknownMethod(key.clone()))?;
        // natives are never woven, so claim the caller's record on their behalf
        let invocation = Invocation::start(&Invocation::signature(name, desc));
        trace!(native = %key, recorded = invocation.is_some(), "native call");
        let mut call = NativeCall { method: &key, args, invocation, hooks: &self.hooks };
        native(&mut call)
    }

    fn find_method(&self, owner: &str, name: &str, desc: &str) -> Option<&Method> {
        self.classes
            .get(owner)?
            .methods
            .iter()
            .find(|method| method.name == name && method.desc.descriptor() == desc)
    }

    fn run(&self, method: &Method, args: Vec<Value>, depth: usize, steps: &mut u64) -> RuntimeResult<Option<Value>> {
        let id = format!("{}.{}{}", method.owner, method.name, method.desc.descriptor());
        let invalid = |reason: String| RuntimeError::InvalidMethod { method: id.clone(), reason };

        let labels = method.label_positions().map_err(|error| invalid(error.to_string()))?;
        if args.len() != method.param_slots() {
            return Err(invalid(format!("expected {} arguments, got {}", method.param_slots(), args.len())));
        }
        let mut locals = args;
        locals.resize(usize::from(method.max_locals).max(locals.len()), Value::Null);
        let mut stack: Vec<Value> = Vec::with_capacity(usize::from(method.max_stack));
        let mut pc = 0;

        let jump = |label: &LabelId| labels.get(label).copied().ok_or_else(|| invalid(format!("unknown label L{label}")));

        loop {
            let Some(insn) = method.insns.get(pc) else {
                return Err(RuntimeError::FellOffEnd(id.clone()));
            };
            *steps += 1;
            if *steps > self.config.max_instructions {
                return Err(RuntimeError::InstructionLimit(self.config.max_instructions));
            }
            let underflow = || RuntimeError::StackUnderflow { method: id.clone(), pc };
            let pop = |stack: &mut Vec<Value>| stack.pop().ok_or_else(underflow);
            let mut next = pc + 1;

            match insn {
                Insn::Nop | Insn::Label(_) => {}
                Insn::Const(constant) => stack.push(match constant {
                    Constant::Int(value) => Value::Int(*value),
                    Constant::Long(value) => Value::Long(*value),
                    Constant::Float(value) => Value::Float(*value),
                    Constant::Double(value) => Value::Double(*value),
                    Constant::Null => Value::Null,
                    Constant::Str(text) => Value::Ref(self.literal(text)),
                }),
                Insn::Load(index) => {
                    let value = locals
                        .get(usize::from(*index))
                        .cloned()
                        .ok_or_else(|| RuntimeError::InvalidLocal { method: id.clone(), index: *index })?;
                    stack.push(value);
                }
                Insn::Store(index) => {
                    let value = pop(&mut stack)?;
                    let slot = locals
                        .get_mut(usize::from(*index))
                        .ok_or_else(|| RuntimeError::InvalidLocal { method: id.clone(), index: *index })?;
                    *slot = value;
                }
                Insn::Dup => {
                    let top = pop(&mut stack)?;
                    stack.push(top.clone());
                    stack.push(top);
                }
                Insn::DupX1 => {
                    let b = pop(&mut stack)?;
                    let a = pop(&mut stack)?;
                    stack.extend([b.clone(), a, b]);
                }
                Insn::Dup2 => {
                    let b = pop(&mut stack)?;
                    let a = pop(&mut stack)?;
                    stack.extend([a.clone(), b.clone(), a, b]);
                }
                Insn::Pop => {
                    pop(&mut stack)?;
                }
                Insn::Swap => {
                    let b = pop(&mut stack)?;
                    let a = pop(&mut stack)?;
                    stack.extend([b, a]);
                }
                Insn::ArrayLoad(_) => {
                    let index = pop(&mut stack)?.as_int()?;
                    let array = pop(&mut stack)?;
                    stack.push(array.as_object("array load")?.load(index)?);
                }
                Insn::ArrayStore(_) => {
                    let value = pop(&mut stack)?;
                    let index = pop(&mut stack)?.as_int()?;
                    let array = pop(&mut stack)?;
                    array.as_object("array store")?.store(index, value)?;
                }
                Insn::ArrayLength => {
                    let array = pop(&mut stack)?;
                    let length = array.as_object("array length")?.length()?;
                    stack.push(Value::Int(i32::try_from(length).unwrap_or(i32::MAX)));
                }
                Insn::NewArray(elem) => {
                    let count = pop(&mut stack)?.as_int()?;
                    let length = usize::try_from(count).map_err(|_| RuntimeError::NegativeArraySize(count))?;
                    stack.push(Value::Ref(HeapObject::new_array(elem.clone(), length)));
                }
                Insn::GetField(field) => {
                    let target = pop(&mut stack)?;
                    let value = target.as_object(&field.name)?.get_field(&field.name, &field.ty)?;
                    stack.push(value);
                }
                Insn::PutField(field) => {
                    let value = pop(&mut stack)?;
                    let target = pop(&mut stack)?;
                    target.as_object(&field.name)?.put_field(&field.name, &field.ty, value)?;
                }
                Insn::Binary { op, ty } => {
                    let b = pop(&mut stack)?;
                    let a = pop(&mut stack)?;
                    stack.push(binary(*op, ty, &a, &b)?);
                }
                Insn::Convert { to, .. } => {
                    let value = pop(&mut stack)?;
                    stack.push(convert(&value, to)?);
                }
                Insn::Invoke(target) => {
                    let start = stack.len().checked_sub(target.operand_count()).ok_or_else(underflow)?;
                    let args = stack.split_off(start);
                    let result = self.call(
                        &target.owner,
                        &target.name,
                        &target.desc.descriptor(),
                        args,
                        depth + 1,
                        steps,
                    )?;
                    if target.desc.ret != Type::Void {
                        stack.push(result.unwrap_or_else(|| Value::default_for(&target.desc.ret)));
                    }
                }
                Insn::Concat(args) => {
                    let start = stack.len().checked_sub(args.len()).ok_or_else(underflow)?;
                    let text: String = args.iter().zip(stack.split_off(start)).map(|(ty, value)| value.render(ty)).collect();
                    stack.push(Value::Ref(HeapObject::string(&text)));
                }
                Insn::Goto(label) => next = jump(label)?,
                Insn::If { cond, target } => {
                    let value = pop(&mut stack)?.as_int()?;
                    if cond.holds(value.cmp(&0)) {
                        next = jump(target)?;
                    }
                }
                Insn::IfCmp { cond, target } => {
                    let b = pop(&mut stack)?.as_int()?;
                    let a = pop(&mut stack)?.as_int()?;
                    if cond.holds(a.cmp(&b)) {
                        next = jump(target)?;
                    }
                }
                Insn::IfNull(target) | Insn::IfNonNull(target) => {
                    let is_null = pop(&mut stack)?.reference()?.is_none();
                    if is_null == matches!(insn, Insn::IfNull(_)) {
                        next = jump(target)?;
                    }
                }
                Insn::IfRefEq(target) | Insn::IfRefNe(target) => {
                    let b = pop(&mut stack)?;
                    let a = pop(&mut stack)?;
                    if a.same_ref(&b)? == matches!(insn, Insn::IfRefEq(_)) {
                        next = jump(target)?;
                    }
                }
                Insn::Return(ty) => {
                    return if *ty == Type::Void { Ok(None) } else { pop(&mut stack).map(Some) };
                }
                Insn::Hook(hook) => self.hooks.execute(hook, &mut stack)?,
            }
            pc = next;
        }
    }
}

fn binary(op: BinaryOp, ty: &Type, a: &Value, b: &Value) -> RuntimeResult<Value> {
    let shift = matches!(op, BinaryOp::Shl | BinaryOp::Shr | BinaryOp::Ushr);
    match ty {
        Type::Long => {
            let y = if shift { i64::from(b.as_int()?) } else { b.as_long()? };
            long_op(op, a.as_long()?, y).map(Value::Long)
        }
        Type::Float => float_op(op, f64::from(a.as_float()?), f64::from(b.as_float()?)).map(|v| Value::Float(v as f32)),
        Type::Double => float_op(op, a.as_double()?, b.as_double()?).map(Value::Double),
        _ => int_op(op, a.as_int()?, b.as_int()?).map(Value::Int),
    }
}

fn int_op(op: BinaryOp, x: i32, y: i32) -> RuntimeResult<i32> {
    Ok(match op {
        BinaryOp::Add => x.wrapping_add(y),
        BinaryOp::Sub => x.wrapping_sub(y),
        BinaryOp::Mul => x.wrapping_mul(y),
        BinaryOp::Div | BinaryOp::Rem if y == 0 => return Err(RuntimeError::DivisionByZero),
        BinaryOp::Div => x.wrapping_div(y),
        BinaryOp::Rem => x.wrapping_rem(y),
        BinaryOp::And => x & y,
        BinaryOp::Or => x | y,
        BinaryOp::Xor => x ^ y,
        BinaryOp::Shl => x.wrapping_shl(y as u32),
        BinaryOp::Shr => x.wrapping_shr(y as u32),
        BinaryOp::Ushr => (x as u32).wrapping_shr(y as u32) as i32,
    })
}

fn long_op(op: BinaryOp, x: i64, y: i64) -> RuntimeResult<i64> {
    Ok(match op {
        BinaryOp::Add => x.wrapping_add(y),
        BinaryOp::Sub => x.wrapping_sub(y),
        BinaryOp::Mul => x.wrapping_mul(y),
        BinaryOp::Div | BinaryOp::Rem if y == 0 => return Err(RuntimeError::DivisionByZero),
        BinaryOp::Div => x.wrapping_div(y),
        BinaryOp::Rem => x.wrapping_rem(y),
        BinaryOp::And => x & y,
        BinaryOp::Or => x | y,
        BinaryOp::Xor => x ^ y,
        BinaryOp::Shl => x.wrapping_shl(y as u32),
        BinaryOp::Shr => x.wrapping_shr(y as u32),
        BinaryOp::Ushr => (x as u64).wrapping_shr(y as u32) as i64,
    })
}

fn float_op(op: BinaryOp, x: f64, y: f64) -> RuntimeResult<f64> {
    match op {
        BinaryOp::Add => Ok(x + y),
        BinaryOp::Sub => Ok(x - y),
        BinaryOp::Mul => Ok(x * y),
        BinaryOp::Div => Ok(x / y),
        BinaryOp::Rem => Ok(x % y),
        _ => Err(RuntimeError::TypeMismatch { expected: "integral operands", found: "floating point".into() }),
    }
}

fn convert(value: &Value, to: &Type) -> RuntimeResult<Value> {
    let converted = match to {
        Type::Long => Value::Long(match value {
            Value::Int(v) => i64::from(*v),
            Value::Long(v) => *v,
            Value::Float(v) => *v as i64,
            Value::Double(v) => *v as i64,
            other => return Err(mismatch(other)),
        }),
        Type::Float => Value::Float(match value {
            Value::Int(v) => *v as f32,
            Value::Long(v) => *v as f32,
            Value::Float(v) => *v,
            Value::Double(v) => *v as f32,
            other => return Err(mismatch(other)),
        }),
        Type::Double => Value::Double(match value {
            Value::Int(v) => f64::from(*v),
            Value::Long(v) => *v as f64,
            Value::Float(v) => f64::from(*v),
            Value::Double(v) => *v,
            other => return Err(mismatch(other)),
        }),
        Type::Int | Type::Byte | Type::Char | Type::Short | Type::Boolean => Value::Int(match value {
            Value::Int(v) => *v,
            Value::Long(v) => *v as i32,
            Value::Float(v) => *v as i32,
            Value::Double(v) => *v as i32,
            other => return Err(mismatch(other)),
        })
        .narrowed(to),
        other => {
            return Err(RuntimeError::TypeMismatch { expected: "numeric type", found: other.to_string() });
        }
    };
    Ok(converted)
}

fn mismatch(value: &Value) -> RuntimeError {
    RuntimeError::TypeMismatch { expected: "number", found: value.describe() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowtrack_weaver::ir::{Cond, InvokeKind, MethodDesc, MethodRef};

    fn executor_with(method: Method) -> Executor {
        let mut executor = Executor::new();
        executor.load_class(Class::new(method.owner.clone()).with_method(method));
        executor
    }

    #[test]
    fn test_arithmetic_and_branches() {
        // max(a, b) * 2
        let method = Method::new("demo/Math", "twiceMax", "(II)I", true).unwrap().with_insns(vec![
            Insn::Load(0),
            Insn::Load(1),
            Insn::IfCmp { cond: Cond::Ge, target: 1 },
            Insn::Load(1),
            Insn::Store(0),
            Insn::Label(1),
            Insn::Load(0),
            Insn::Const(Constant::Int(1)),
            Insn::Binary { op: BinaryOp::Shl, ty: Type::Int },
            Insn::Return(Type::Int),
        ]);
        let executor = executor_with(method);
        let result = executor.invoke("demo/Math", "twiceMax", "(II)I", vec![Value::Int(3), Value::Int(8)]).unwrap();
        assert_eq!(result.unwrap().as_int().unwrap(), 16);
        let result = executor.invoke("demo/Math", "twiceMax", "(II)I", vec![Value::Int(9), Value::Int(8)]).unwrap();
        assert_eq!(result.unwrap().as_int().unwrap(), 18);
    }

    #[test]
    fn test_division_by_zero() {
        let method = Method::new("demo/Math", "div", "(II)I", true).unwrap().with_insns(vec![
            Insn::Load(0),
            Insn::Load(1),
            Insn::Binary { op: BinaryOp::Div, ty: Type::Int },
            Insn::Return(Type::Int),
        ]);
        let executor = executor_with(method);
        let error = executor.invoke("demo/Math", "div", "(II)I", vec![Value::Int(1), Value::Int(0)]).unwrap_err();
        assert_eq!(error, RuntimeError::DivisionByZero);
    }

    #[test]
    fn test_byte_conversion_truncates() {
        assert_eq!(convert(&Value::Int(0x1ff), &Type::Byte).unwrap().as_int().unwrap(), -1);
        assert_eq!(convert(&Value::Int(-1), &Type::Char).unwrap().as_int().unwrap(), 0xffff);
        assert_eq!(convert(&Value::Int(7), &Type::Long).unwrap().as_long().unwrap(), 7);
        assert!(convert(&Value::Null, &Type::Int).is_err());
    }

    #[test]
    fn test_literals_are_interned() {
        let method = Method::new("demo/Text", "same", "()Z", true).unwrap().with_insns(vec![
            Insn::Const(Constant::Str("kw".into())),
            Insn::Const(Constant::Str("kw".into())),
            Insn::IfRefNe(1),
            Insn::Const(Constant::Int(1)),
            Insn::Return(Type::Boolean),
            Insn::Label(1),
            Insn::Const(Constant::Int(0)),
            Insn::Return(Type::Boolean),
        ]);
        let executor = executor_with(method);
        let result = executor.invoke("demo/Text", "same", "()Z", Vec::new()).unwrap();
        assert_eq!(result.unwrap().as_int().unwrap(), 1);
    }

    #[test]
    fn test_runaway_recursion_is_bounded() {
        let desc = MethodDesc::parse("()V").unwrap();
        let method = Method::new("demo/Loop", "spin", "()V", true).unwrap().with_insns(vec![
            Insn::Invoke(MethodRef::new(InvokeKind::Static, "demo/Loop", "spin", desc)),
            Insn::Return(Type::Void),
        ]);
        let executor = executor_with(method).with_config(ExecutorConfig::default().with_max_call_depth(16));
        let error = executor.invoke("demo/Loop", "spin", "()V", Vec::new()).unwrap_err();
        assert_eq!(error, RuntimeError::CallDepthExceeded(16));
    }

    #[test]
    fn test_infinite_loop_is_bounded() {
        let method = Method::new("demo/Loop", "forever", "()V", true)
            .unwrap()
            .with_insns(vec![Insn::Label(0), Insn::Goto(0)]);
        let executor = executor_with(method).with_config(ExecutorConfig::default().with_max_instructions(1000));
        let error = executor.invoke("demo/Loop", "forever", "()V", Vec::new()).unwrap_err();
        assert_eq!(error, RuntimeError::InstructionLimit(1000));
    }

    #[test]
    fn test_unknown_method() {
        let executor = Executor::new();
        let error = executor.invoke("demo/Missing", "run", "()V", Vec::new()).unwrap_err();
        assert_eq!(error, RuntimeError::UnknownMethod("demo/Missing.run()V".into()));
    }

    #[test]
    fn test_falling_off_the_end() {
        let method = Method::new("demo/Bad", "noReturn", "()V", true).unwrap().with_insns(vec![Insn::Nop]);
        let executor = executor_with(method);
        let error = executor.invoke("demo/Bad", "noReturn", "()V", Vec::new()).unwrap_err();
        assert_eq!(error, RuntimeError::FellOffEnd("demo/Bad.noReturn()V".into()));
    }
}
