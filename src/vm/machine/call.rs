//! 호출 규약: 인자 바인딩, 프레임 진입, memo, 비동기 spawn

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, error, trace};

use super::{ErrorKind, Frame, MemoFn, MemoKey, Vm, VmResult, err};
use crate::natives::NativeFunction;
use crate::vm::bytecode::FunctionFlags;
use crate::vm::object::{Closure, EnumChild, Instance, LanguageClass};
use crate::vm::value::{MapKey, Value};

type Kwargs = Vec<(Arc<str>, Value)>;

impl Vm {
    /// Starts a call. Returns the result right away for natives, enum
    /// variants and memo hits; otherwise pushes a frame and returns `None`.
    pub(super) fn invoke(&mut self, callee: Value, args: Vec<Value>, kwargs: Kwargs) -> VmResult<Option<Value>> {
        match callee {
            Value::Closure(closure) => {
                let slot0 = Value::Closure(closure.clone());
                self.enter(closure, slot0, args, kwargs, false)
            }
            Value::BoundMethod(bound) => {
                self.enter(bound.method.clone(), bound.receiver.clone(), args, kwargs, false)
            }
            Value::Native(native) => self.call_native(&native, args, kwargs).map(Some),
            Value::Class(class) => self.construct(class, args, kwargs),
            Value::EnumVariant(def, index) => {
                let expected = def.variants[index].fields.len();
                if !kwargs.is_empty() || args.len() != expected {
                    return Err(err(
                        ErrorKind::ArgumentCountError,
                        format!(
                            "{}.{} takes {} fields, got {}",
                            def.name,
                            def.variants[index].name,
                            expected,
                            args.len() + kwargs.len()
                        ),
                    ));
                }
                Ok(Some(Value::EnumChild(Arc::new(EnumChild::new(def, index, args)))))
            }
            Value::Cell(var) => self.invoke(var.get(), args, kwargs),
            other => Err(err(
                ErrorKind::TypeError,
                format!("{} is not callable", other.type_name()),
            )),
        }
    }

    fn call_native(&mut self, native: &NativeFunction, args: Vec<Value>, kwargs: Kwargs) -> VmResult<Value> {
        if !kwargs.is_empty() {
            return Err(err(
                ErrorKind::ArgumentCountError,
                format!("`{}` takes no keyword arguments", native.name),
            ));
        }
        if !native.arity.check(args.len()) {
            return Err(err(
                ErrorKind::ArgumentCountError,
                format!(
                    "`{}` expects {} arguments, got {}",
                    native.name,
                    native.arity.description(),
                    args.len()
                ),
            ));
        }
        (native.func)(self, args).map_err(|e| err(ErrorKind::from_name(&e.kind), e.message))
    }

    fn construct(&mut self, class: Arc<LanguageClass>, args: Vec<Value>, kwargs: Kwargs) -> VmResult<Option<Value>> {
        let instance = Value::Instance(Arc::new(Instance::new(class.clone())));
        let constructor = class.constructor.read().clone();
        match constructor {
            Some(ctor) => self.enter(ctor, instance, args, kwargs, true),
            None if args.is_empty() && kwargs.is_empty() => Ok(Some(instance)),
            None => Err(err(
                ErrorKind::ArgumentCountError,
                format!("{} takes no arguments", class.name),
            )),
        }
    }

    /// Pushes a frame for `closure` with `slot0` (callee, receiver or new
    /// instance) and the bound arguments.
    fn enter(
        &mut self,
        closure: Arc<Closure>,
        slot0: Value,
        args: Vec<Value>,
        kwargs: Kwargs,
        constructor: bool,
    ) -> VmResult<Option<Value>> {
        let flags = closure.function.flags;
        let catcher = flags.contains(FunctionFlags::CATCHER);
        let memo = if flags.contains(FunctionFlags::MEMOIZE) && kwargs.is_empty() {
            memo_key(&closure, &args)
        } else {
            None
        };
        if let Some(key) = &memo
            && let Some(hit) = self.runtime.memo.get(key)
        {
            trace!(function = %closure.function.name, "memo hit");
            let v = hit.value().clone();
            return Ok(Some(if catcher { Value::ok(v) } else { v }));
        }
        if self.frames.len() >= self.max_frames {
            return Err(err(
                ErrorKind::StackOverflow,
                format!("maximum call depth {} exceeded", self.max_frames),
            ));
        }

        let values = bind_arguments(&closure, args, kwargs)?;
        let base = self.stack.len();
        self.push(slot0)?;
        for v in values {
            self.push(v)?;
        }
        self.frames.push(Frame {
            closure,
            ip: 0,
            base,
            catcher,
            memo,
            constructor,
            caches: self.caches.len(),
        });
        Ok(None)
    }

    /// Runs `callee` on a new thread with its own VM over the shared runtime.
    pub(super) fn spawn(&mut self, callee: Value, args: Vec<Value>, kwargs: Kwargs) {
        let runtime = self.runtime.clone();
        let task = callee.to_string();
        debug!(task = %task, "spawning async task");
        let handle = std::thread::spawn(move || {
            let mut vm = Vm::new(runtime);
            if let Err(e) = vm.call_sync(callee, args, kwargs) {
                error!(task = %task, error = %e, "async task failed");
            }
        });
        self.runtime.tasks.lock().push(handle);
    }
}

fn memo_key(closure: &Arc<Closure>, args: &[Value]) -> Option<MemoKey> {
    let key = args
        .iter()
        .map(MapKey::from_value)
        .collect::<Option<Vec<_>>>()?;
    Some((MemoFn(closure.function.clone()), key))
}

/// Lays out parameter values: positional, then keywords by name, then
/// defaults for the missing trailing ones, then varargs and kwargs.
fn bind_arguments(closure: &Closure, args: Vec<Value>, kwargs: Kwargs) -> VmResult<Vec<Value>> {
    let function = &closure.function;
    let total = function.total_arity;
    let varargs = function.flags.contains(FunctionFlags::VARARGS);
    let has_kwargs = function.flags.contains(FunctionFlags::KWARGS);
    let given = args.len();

    let mut slots: Vec<Option<Value>> = vec![None; total];
    let mut rest = Vec::new();
    for (i, v) in args.into_iter().enumerate() {
        match slots.get_mut(i) {
            Some(slot) => *slot = Some(v),
            None if varargs => rest.push(v),
            None => {
                return Err(err(
                    ErrorKind::ArgumentCountError,
                    format!(
                        "`{}` takes at most {} arguments, got {}",
                        function.name, total, given
                    ),
                ));
            }
        }
    }

    let mut extra = IndexMap::new();
    for (name, v) in kwargs {
        match function.params.iter().position(|p| p.as_str() == &*name) {
            Some(i) if slots[i].is_some() => {
                return Err(err(
                    ErrorKind::ArgumentCountError,
                    format!("`{}` got multiple values for `{}`", function.name, name),
                ));
            }
            Some(i) => slots[i] = Some(v),
            None if has_kwargs => {
                extra.insert(MapKey::Str(name), v);
            }
            None => {
                return Err(err(
                    ErrorKind::ArgumentCountError,
                    format!("`{}` got an unexpected keyword argument `{}`", function.name, name),
                ));
            }
        }
    }

    let mut values = Vec::with_capacity(total + 2);
    for (i, slot) in slots.into_iter().enumerate() {
        match slot {
            Some(v) => values.push(v),
            None if i >= function.arity => {
                values.push(
                    closure
                        .defaults
                        .get(i - function.arity)
                        .cloned()
                        .unwrap_or(Value::Null),
                );
            }
            None => {
                let param = function.params.get(i).map(String::as_str).unwrap_or("?");
                return Err(err(
                    ErrorKind::ArgumentCountError,
                    format!("`{}` is missing argument `{}`", function.name, param),
                ));
            }
        }
    }
    if varargs {
        values.push(Value::list(rest));
    }
    if has_kwargs {
        values.push(Value::map(extra));
    }
    Ok(values)
}
