//! A small in-memory object model
//!
//! `SimpleHost` implements [`ObjectModel`] with plain objects, arrays,
//! native functions, classes with single inheritance and the builtin error
//! classes. It is enough to run real method bodies in tests, benchmarks and
//! tools; embedders with a full runtime implement the trait themselves.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::abc::Name;
use super::host::{ErrorKind, ExecError, Hint, HostFault, HostResult, MethodRef, ObjectModel, ScopeEntry};
use super::ops;
use super::value::{ObjectId, Value};

/// A host function: `(host, receiver, args)`
pub type NativeFn = Rc<dyn Fn(&mut SimpleHost, &Value, &[Value]) -> HostResult<Value>>;

struct ClassData {
    name: Rc<str>,
    base: Option<ObjectId>,
    /// Instance methods
    methods: Vec<(Rc<str>, NativeFn)>,
    /// Runs on new instances with the constructor arguments
    init: Option<NativeFn>,
    /// Behaviour when the class is called as a function
    call: Option<NativeFn>,
}

enum Kind {
    Plain,
    Array(Vec<Value>),
    Function(NativeFn),
    /// Created by `newfunction`; this host cannot run it
    Closure { method: u32 },
    Class(ClassData),
}

struct Object {
    kind: Kind,
    /// Class of an instance
    class: Option<ObjectId>,
    props: Vec<(Rc<str>, Value)>,
    slots: Vec<Value>,
}

impl Object {
    fn new(kind: Kind, class: Option<ObjectId>) -> Self {
        Object { kind, class, props: Vec::new(), slots: Vec::new() }
    }

    fn prop(&self, key: &str) -> Option<&Value> {
        self.props.iter().find(|(k, _)| &**k == key).map(|(_, v)| v)
    }

    fn set_prop(&mut self, key: Rc<str>, value: Value) {
        match self.props.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.props.push((key, value)),
        }
    }
}

/// Reference object model
pub struct SimpleHost {
    objects: Vec<Object>,
    classes: FxHashMap<Rc<str>, ObjectId>,
    global: ObjectId,
    memory: Option<Rc<RefCell<Vec<u8>>>>,
}

impl fmt::Debug for SimpleHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleHost")
            .field("objects", &self.objects.len())
            .field("classes", &self.classes.len())
            .finish()
    }
}

impl Default for SimpleHost {
    fn default() -> Self {
        Self::new()
    }
}

fn array_index(key: &str) -> Option<usize> {
    if key.is_empty() || (key.len() > 1 && key.starts_with('0')) {
        return None;
    }
    key.parse().ok()
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or(Value::Undefined)
}

/// Check a primitive against a builtin type name; `None` for other names
fn builtin_is(name: &str, value: &Value) -> Option<bool> {
    Some(match name {
        "*" => true,
        "Object" => !value.is_nullish(),
        "int" => matches!(value, Value::Int(_)),
        "uint" => match value {
            Value::Int(i) => *i >= 0,
            Value::Number(n) => n.fract() == 0.0 && *n >= 0.0 && *n <= u32::MAX as f64,
            _ => false,
        },
        "Number" => value.is_number(),
        "String" => matches!(value, Value::String(_)),
        "Boolean" => matches!(value, Value::Bool(_)),
        _ => return None,
    })
}

impl SimpleHost {
    /// A host with a global object holding the builtin classes, `Math`,
    /// `isNaN`, `NaN` and `Infinity`
    pub fn new() -> Self {
        let mut host = SimpleHost {
            objects: vec![Object::new(Kind::Plain, None)],
            classes: FxHashMap::default(),
            global: ObjectId(0),
            memory: None,
        };
        host.install_builtins();
        host
    }

    fn alloc(&mut self, object: Object) -> ObjectId {
        self.objects.push(object);
        ObjectId(self.objects.len() as u32 - 1)
    }

    fn object(&self, id: ObjectId) -> &Object {
        &self.objects[id.0 as usize]
    }

    fn object_mut(&mut self, id: ObjectId) -> &mut Object {
        &mut self.objects[id.0 as usize]
    }

    fn class_data(&self, id: ObjectId) -> Option<&ClassData> {
        match &self.object(id).kind {
            Kind::Class(data) => Some(data),
            _ => None,
        }
    }

    fn install_builtins(&mut self) {
        let object = self.define_class("Object", None);
        let conversions: [(&str, fn(&mut SimpleHost, Value) -> HostResult<Value>); 5] = [
            ("int", |h, v| Ok(Value::Int(super::value::to_int32(ops::to_number(h, &v)?)))),
            ("uint", |h, v| Ok(Value::from_u32(super::value::to_uint32(ops::to_number(h, &v)?)))),
            ("Number", |h, v| Ok(Value::from_f64(ops::to_number(h, &v)?))),
            ("String", |h, v| Ok(Value::String(ops::to_string(h, &v)?))),
            ("Boolean", |_, v| Ok(Value::Bool(v.to_boolean()))),
        ];
        for (name, convert) in conversions {
            let class = self.define_class(name, Some(&object));
            let call: NativeFn = Rc::new(move |h: &mut SimpleHost, _: &Value, args: &[Value]| convert(h, arg(args, 0)));
            self.set_class_call(&class, call);
        }
        self.define_class("Array", Some(&object));

        let error = self.define_class("Error", Some(&object));
        let init: NativeFn = Rc::new(|h: &mut SimpleHost, this: &Value, args: &[Value]| {
            let message = match arg(args, 0) {
                Value::Undefined => Rc::from(""),
                other => ops::to_string(h, &other)?,
            };
            let id = ops::to_number(h, &arg(args, 1)).map(|n| if n.is_nan() { 0.0 } else { n })?;
            h.set_property(this, &Name::public("message"), Value::String(message))?;
            h.set_property(this, &Name::public("errorID"), Value::from_f64(id))?;
            Ok(Value::Undefined)
        });
        self.set_initializer(&error, init);
        for kind in [
            ErrorKind::TypeError,
            ErrorKind::ReferenceError,
            ErrorKind::RangeError,
            ErrorKind::ArgumentError,
            ErrorKind::VerifyError,
        ] {
            self.define_class(kind.class_name(), Some(&error));
        }

        let math = self.new_plain(Vec::new());
        let unary: [(&str, fn(f64) -> f64); 4] =
            [("abs", f64::abs), ("floor", f64::floor), ("sqrt", f64::sqrt), ("ceil", f64::ceil)];
        for (name, f) in unary {
            let func = self.function(move |h, _, args| Ok(Value::from_f64(f(ops::to_number(h, &arg(args, 0))?))));
            self.set_prop(&math, name, func);
        }
        let max = self.function(|h, _, args| fold_numbers(h, args, f64::NEG_INFINITY, f64::max));
        let min = self.function(|h, _, args| fold_numbers(h, args, f64::INFINITY, f64::min));
        self.set_prop(&math, "max", max);
        self.set_prop(&math, "min", min);
        self.define_global("Math", math);

        self.define_function("isNaN", |h, _, args| Ok(Value::Bool(ops::to_number(h, &arg(args, 0))?.is_nan())));
        self.define_global("NaN", Value::Number(f64::NAN));
        self.define_global("Infinity", Value::Number(f64::INFINITY));
    }

    // ===== Embedding helpers =====

    /// The global object
    pub fn global(&self) -> Value {
        Value::Object(self.global)
    }

    /// Scope chain holding just the global object
    pub fn global_scope(&self) -> Vec<ScopeEntry> {
        vec![ScopeEntry::new(self.global())]
    }

    pub fn define_global(&mut self, name: &str, value: Value) {
        let global = self.global;
        self.object_mut(global).set_prop(Rc::from(name), value);
    }

    /// Wrap a closure as a plain function object
    pub fn function(&mut self, f: impl Fn(&mut SimpleHost, &Value, &[Value]) -> HostResult<Value> + 'static) -> Value {
        Value::Object(self.alloc(Object::new(Kind::Function(Rc::new(f)), None)))
    }

    /// Define a global function
    pub fn define_function(
        &mut self,
        name: &str,
        f: impl Fn(&mut SimpleHost, &Value, &[Value]) -> HostResult<Value> + 'static,
    ) -> Value {
        let func = self.function(f);
        self.define_global(name, func.clone());
        func
    }

    /// Define a global class deriving from `base`
    pub fn define_class(&mut self, name: &str, base: Option<&Value>) -> Value {
        let name: Rc<str> = Rc::from(name);
        let data = ClassData {
            name: name.clone(),
            base: base.and_then(Value::as_object),
            methods: Vec::new(),
            init: None,
            call: None,
        };
        let id = self.alloc(Object::new(Kind::Class(data), None));
        self.classes.insert(name.clone(), id);
        self.define_global(&name, Value::Object(id));
        Value::Object(id)
    }

    /// Add an instance method to a class
    pub fn add_method(
        &mut self,
        class: &Value,
        name: &str,
        f: impl Fn(&mut SimpleHost, &Value, &[Value]) -> HostResult<Value> + 'static,
    ) {
        if let Some(Kind::Class(data)) = class.as_object().map(|id| &mut self.object_mut(id).kind) {
            data.methods.push((Rc::from(name), Rc::new(f)));
        }
    }

    /// Set the code run on each new instance of `class`
    pub fn set_initializer(&mut self, class: &Value, f: NativeFn) {
        if let Some(Kind::Class(data)) = class.as_object().map(|id| &mut self.object_mut(id).kind) {
            data.init = Some(f);
        }
    }

    fn set_class_call(&mut self, class: &Value, f: NativeFn) {
        if let Some(Kind::Class(data)) = class.as_object().map(|id| &mut self.object_mut(id).kind) {
            data.call = Some(f);
        }
    }

    fn new_plain(&mut self, props: Vec<(Rc<str>, Value)>) -> Value {
        let mut object = Object::new(Kind::Plain, None);
        object.props = props;
        Value::Object(self.alloc(object))
    }

    /// A plain object with the given properties
    pub fn object_with(&mut self, props: &[(&str, Value)]) -> Value {
        self.new_plain(props.iter().map(|(k, v)| (Rc::from(*k), v.clone())).collect())
    }

    pub fn set_prop(&mut self, obj: &Value, key: &str, value: Value) {
        if let Some(id) = obj.as_object() {
            self.object_mut(id).set_prop(Rc::from(key), value);
        }
    }

    /// Own property of an object, `Undefined` when absent
    pub fn get(&self, obj: &Value, key: &str) -> Value {
        obj.as_object()
            .and_then(|id| self.object(id).prop(key).cloned())
            .unwrap_or(Value::Undefined)
    }

    /// Elements of an array object
    pub fn array_values(&self, v: &Value) -> Option<Vec<Value>> {
        match &self.object(v.as_object()?).kind {
            Kind::Array(items) => Some(items.clone()),
            _ => None,
        }
    }

    /// Class name of an instance or class object
    pub fn class_name_of(&self, v: &Value) -> Option<Rc<str>> {
        let id = v.as_object()?;
        let class = self.object(id).class.unwrap_or(id);
        self.class_data(class).map(|c| c.name.clone())
    }

    /// `message` of an error object
    pub fn error_message(&self, v: &Value) -> Option<String> {
        match self.get(v, "message") {
            Value::String(s) => Some(s.to_string()),
            _ => None,
        }
    }

    /// Install a domain memory of `bytes` and return a handle to it
    pub fn set_domain_memory(&mut self, bytes: Vec<u8>) -> Rc<RefCell<Vec<u8>>> {
        let mem = Rc::new(RefCell::new(bytes));
        self.memory = Some(mem.clone());
        mem
    }

    // ===== Internals =====

    fn class_named(&self, name: &Name) -> Option<ObjectId> {
        self.classes.get(name.local_name()).copied()
    }

    /// Whether `value` is an instance of `class` or one of its subclasses
    fn instance_of_class(&self, value: &Value, class: ObjectId) -> bool {
        let Some(mut current) = value.as_object().and_then(|id| self.object(id).class) else {
            return false;
        };
        loop {
            if current == class {
                return true;
            }
            match self.class_data(current).and_then(|c| c.base) {
                Some(base) => current = base,
                None => return false,
            }
        }
    }

    fn is_class_value(&self, value: &Value, class: ObjectId) -> bool {
        let builtin = self.class_data(class).and_then(|c| builtin_is(&c.name, value));
        match value {
            Value::Object(_) => builtin == Some(true) || self.instance_of_class(value, class),
            _ => builtin.unwrap_or(false),
        }
    }

    /// Method `key` on the class chain starting at `class`
    fn find_method(&self, class: Option<ObjectId>, key: &str) -> Option<NativeFn> {
        let mut current = class;
        while let Some(id) = current {
            let data = self.class_data(id)?;
            if let Some((_, f)) = data.methods.iter().find(|(k, _)| &**k == key) {
                return Some(f.clone());
            }
            current = data.base;
        }
        None
    }

    fn lookup(&self, id: ObjectId, key: &str) -> Option<Value> {
        let object = self.object(id);
        if let Kind::Array(items) = &object.kind {
            if key == "length" {
                return Some(Value::from_u32(items.len() as u32));
            }
            if let Some(i) = array_index(key) {
                return Some(items.get(i).cloned().unwrap_or(Value::Undefined));
            }
        }
        if let Some(v) = object.prop(key) {
            return Some(v.clone());
        }
        None
    }

    fn method_value(&mut self, class: Option<ObjectId>, key: &str) -> Option<Value> {
        let f = self.find_method(class, key)?;
        Some(Value::Object(self.alloc(Object::new(Kind::Function(f), None))))
    }

    fn construct_instance(&mut self, class: ObjectId, args: &[Value]) -> HostResult<Value> {
        let instance = Value::Object(self.alloc(Object::new(Kind::Plain, Some(class))));
        let mut chain = Vec::new();
        let mut current = Some(class);
        while let Some(id) = current {
            let Some(data) = self.class_data(id) else { break };
            chain.push(data.init.clone());
            current = data.base;
        }
        // The nearest initializer runs; classes without one inherit it.
        if let Some(init) = chain.into_iter().flatten().next() {
            init(self, &instance, args)?;
        }
        Ok(instance)
    }

    fn call_native(&mut self, f: NativeFn, receiver: &Value, args: &[Value]) -> HostResult<Value> {
        f(self, receiver, args)
    }

    fn default_string(&self, id: ObjectId) -> String {
        let object = self.object(id);
        let error = self.classes.get("Error").copied();
        match &object.kind {
            Kind::Array(_) => String::new(),
            Kind::Function(_) | Kind::Closure { .. } => "function Function() {}".to_string(),
            Kind::Class(data) => format!("[class {}]", data.name),
            Kind::Plain => match object.class.and_then(|c| self.class_data(c)) {
                Some(class) if error.is_some_and(|e| self.instance_of_class(&Value::Object(id), e)) => {
                    let message = object.prop("message").map(|m| m.to_string()).unwrap_or_default();
                    if message.is_empty() {
                        class.name.to_string()
                    } else {
                        format!("{}: {}", class.name, message)
                    }
                }
                Some(class) => format!("[object {}]", class.name),
                None => "[object Object]".to_string(),
            },
        }
    }
}

fn fold_numbers(host: &mut SimpleHost, args: &[Value], init: f64, f: fn(f64, f64) -> f64) -> HostResult<Value> {
    let mut acc = init;
    for a in args {
        let n = ops::to_number(host, a)?;
        if n.is_nan() {
            return Ok(Value::Number(f64::NAN));
        }
        acc = f(acc, n);
    }
    Ok(Value::from_f64(acc))
}

fn not_a_function(v: &Value) -> ExecError {
    HostFault::type_error(1006, format!("value {v} is not a function.")).into()
}

impl ObjectModel for SimpleHost {
    fn get_property(&mut self, obj: &Value, name: &Name) -> HostResult<Value> {
        ops::check_receiver(obj)?;
        let Some(key) = name.local.clone() else {
            return Ok(Value::Undefined);
        };
        match obj {
            Value::Object(id) => {
                if let Some(v) = self.lookup(*id, &key) {
                    return Ok(v);
                }
                let class = self.object(*id).class;
                Ok(self.method_value(class, &key).unwrap_or(Value::Undefined))
            }
            Value::String(s) if &*key == "length" => Ok(Value::from_u32(s.encode_utf16().count() as u32)),
            _ => Ok(Value::Undefined),
        }
    }

    fn set_property(&mut self, obj: &Value, name: &Name, value: Value) -> HostResult<()> {
        ops::check_receiver(obj)?;
        let (Some(id), Some(key)) = (obj.as_object(), name.local.clone()) else {
            return Err(HostFault::reference_error(
                1056,
                format!("Cannot create property {name} on {}.", ops::type_of(self, obj)),
            )
            .into());
        };
        let object = self.object_mut(id);
        if let Kind::Array(items) = &mut object.kind {
            if let Some(i) = array_index(&key) {
                if i >= items.len() {
                    items.resize(i + 1, Value::Undefined);
                }
                items[i] = value;
                return Ok(());
            }
        }
        object.set_prop(key, value);
        Ok(())
    }

    fn delete_property(&mut self, obj: &Value, name: &Name) -> HostResult<bool> {
        ops::check_receiver(obj)?;
        let (Some(id), Some(key)) = (obj.as_object(), name.local.as_deref()) else {
            return Ok(false);
        };
        let object = self.object_mut(id);
        let before = object.props.len();
        object.props.retain(|(k, _)| &**k != key);
        Ok(object.props.len() != before)
    }

    fn has_property(&mut self, obj: &Value, name: &Name) -> HostResult<bool> {
        ops::check_receiver(obj)?;
        let (Some(id), Some(key)) = (obj.as_object(), name.local.as_deref()) else {
            return Ok(false);
        };
        if self.lookup(id, key).is_some() {
            return Ok(true);
        }
        Ok(self.find_method(self.object(id).class, key).is_some())
    }

    fn call(&mut self, callee: &Value, receiver: &Value, args: &[Value]) -> HostResult<Value> {
        let Some(id) = callee.as_object() else {
            return Err(not_a_function(callee));
        };
        match &self.object(id).kind {
            Kind::Function(f) => {
                let f = f.clone();
                self.call_native(f, receiver, args)
            }
            Kind::Class(ClassData { call: Some(f), .. }) => {
                let f = f.clone();
                self.call_native(f, receiver, args)
            }
            Kind::Closure { method } => Err(HostFault::new(
                ErrorKind::Error,
                1006,
                format!("Closure of method {method} cannot run on this host."),
            )
            .into()),
            _ => Err(not_a_function(callee)),
        }
    }

    fn is_plain_function(&self, value: &Value) -> bool {
        value.as_object().is_some_and(|id| matches!(self.object(id).kind, Kind::Function(_)))
    }

    fn call_function(&mut self, callee: &Value, receiver: &Value, args: &[Value]) -> HostResult<Value> {
        match callee.as_object().map(|id| &self.object(id).kind) {
            Some(Kind::Function(f)) => {
                let f = f.clone();
                self.call_native(f, receiver, args)
            }
            _ => self.call(callee, receiver, args),
        }
    }

    fn construct(&mut self, ctor: &Value, args: &[Value]) -> HostResult<Value> {
        match ctor.as_object() {
            Some(id) if self.class_data(id).is_some() => self.construct_instance(id, args),
            _ => Err(HostFault::type_error(1007, "Instantiation attempted on a non-constructor.").into()),
        }
    }

    fn call_method(&mut self, _receiver: &Value, disp: u32, _args: &[Value]) -> HostResult<Value> {
        Err(HostFault::type_error(1006, format!("Method slot {disp} is not available on this host.")).into())
    }

    fn call_static(&mut self, _receiver: &Value, method: u32, _args: &[Value]) -> HostResult<Value> {
        Err(HostFault::type_error(1006, format!("Static method {method} is not available on this host.")).into())
    }

    fn get_super(&mut self, obj: &Value, name: &Name) -> HostResult<Value> {
        ops::check_receiver(obj)?;
        let base = obj
            .as_object()
            .and_then(|id| self.object(id).class)
            .and_then(|c| self.class_data(c))
            .and_then(|c| c.base);
        let key = name.local_name().to_string();
        match self.method_value(base, &key) {
            Some(v) => Ok(v),
            None => self.get_property(obj, name),
        }
    }

    fn set_super(&mut self, obj: &Value, name: &Name, value: Value) -> HostResult<()> {
        self.set_property(obj, name, value)
    }

    fn call_super(&mut self, obj: &Value, name: &Name, args: &[Value]) -> HostResult<Value> {
        let method = self.get_super(obj, name)?;
        self.call(&method, obj, args)
    }

    fn construct_super(&mut self, obj: &Value, args: &[Value]) -> HostResult<()> {
        ops::check_receiver(obj)?;
        let mut current = obj
            .as_object()
            .and_then(|id| self.object(id).class)
            .and_then(|c| self.class_data(c))
            .and_then(|c| c.base);
        while let Some(id) = current {
            let Some(data) = self.class_data(id) else { break };
            let (init, base) = (data.init.clone(), data.base);
            if let Some(init) = init {
                init(self, obj, args)?;
                break;
            }
            current = base;
        }
        Ok(())
    }

    fn find_definition(&mut self, name: &Name) -> HostResult<Value> {
        let global = self.global();
        if self.has_property(&global, name)? {
            return Ok(global);
        }
        Err(HostFault::reference_error(1065, format!("Variable {name} is not defined.")).into())
    }

    fn coerce(&mut self, value: Value, ty: &Name) -> HostResult<Value> {
        let result = match ty.local_name() {
            "*" => value,
            "void" => Value::Undefined,
            "Object" => match value {
                Value::Undefined => Value::Null,
                other => other,
            },
            "int" => Value::Int(super::value::to_int32(ops::to_number(self, &value)?)),
            "uint" => Value::from_u32(super::value::to_uint32(ops::to_number(self, &value)?)),
            "Number" => Value::from_f64(ops::to_number(self, &value)?),
            "Boolean" => Value::Bool(value.to_boolean()),
            "String" => match value {
                Value::Undefined | Value::Null => Value::Null,
                other => Value::String(ops::to_string(self, &other)?),
            },
            _ if value.is_nullish() => Value::Null,
            _ => {
                if self.is_type(&value, ty)? {
                    value
                } else {
                    return Err(HostFault::type_error(
                        1034,
                        format!("Type Coercion failed: cannot convert {value} to {ty}."),
                    )
                    .into());
                }
            }
        };
        Ok(result)
    }

    fn is_type(&mut self, value: &Value, ty: &Name) -> HostResult<bool> {
        if let Some(result) = builtin_is(ty.local_name(), value) {
            return Ok(result);
        }
        Ok(self.class_named(ty).is_some_and(|class| self.instance_of_class(value, class)))
    }

    fn is_type_value(&mut self, value: &Value, ty: &Value) -> HostResult<bool> {
        match ty.as_object() {
            Some(class) if self.class_data(class).is_some() => Ok(self.is_class_value(value, class)),
            _ => Err(HostFault::type_error(1041, "The right-hand side of operator must be a class.").into()),
        }
    }

    fn instance_of(&mut self, value: &Value, ctor: &Value) -> HostResult<bool> {
        match ctor.as_object() {
            Some(class) if self.class_data(class).is_some() => Ok(self.instance_of_class(value, class)),
            _ => Err(HostFault::type_error(1040, "The right-hand side of instanceof must be a class or function.").into()),
        }
    }

    fn type_of(&self, obj: ObjectId) -> &'static str {
        match self.object(obj).kind {
            Kind::Function(_) | Kind::Closure { .. } => "function",
            _ => "object",
        }
    }

    fn to_primitive(&mut self, value: &Value, hint: Hint) -> HostResult<Value> {
        let Some(id) = value.as_object() else {
            return Ok(value.clone());
        };
        let order = match hint {
            Hint::Number => ["valueOf", "toString"],
            Hint::String => ["toString", "valueOf"],
        };
        let class = self.object(id).class;
        for key in order {
            if let Some(f) = self.find_method(class, key) {
                let result = self.call_native(f, value, &[])?;
                if !matches!(result, Value::Object(_)) {
                    return Ok(result);
                }
            }
        }
        if let Kind::Array(items) = &self.object(id).kind {
            let items = items.clone();
            let mut parts = Vec::with_capacity(items.len());
            for item in &items {
                parts.push(if item.is_nullish() { Rc::from("") } else { ops::to_string(self, item)? });
            }
            return Ok(Value::string(&parts.join(",")));
        }
        Ok(Value::string(&self.default_string(id)))
    }

    fn new_object(&mut self, pairs: Vec<(Rc<str>, Value)>) -> HostResult<Value> {
        let class = self.classes.get("Object").copied();
        let mut object = Object::new(Kind::Plain, class);
        for (k, v) in pairs {
            object.set_prop(k, v);
        }
        Ok(Value::Object(self.alloc(object)))
    }

    fn new_array(&mut self, elements: Vec<Value>) -> HostResult<Value> {
        let class = self.classes.get("Array").copied();
        Ok(Value::Object(self.alloc(Object::new(Kind::Array(elements), class))))
    }

    fn new_activation(&mut self, _method: &MethodRef) -> HostResult<Value> {
        Ok(self.new_plain(Vec::new()))
    }

    fn new_function(&mut self, method: u32, _scope: Vec<ScopeEntry>) -> HostResult<Value> {
        Ok(Value::Object(self.alloc(Object::new(Kind::Closure { method }, None))))
    }

    fn new_catch_scope(&mut self, _index: u32) -> HostResult<Value> {
        Ok(self.new_plain(Vec::new()))
    }

    fn apply_type(&mut self, base: &Value, _params: &[Value]) -> HostResult<Value> {
        Ok(base.clone())
    }

    fn get_slot(&mut self, obj: &Value, index: u32) -> HostResult<Value> {
        ops::check_receiver(obj)?;
        let Some(id) = obj.as_object() else {
            return Ok(Value::Undefined);
        };
        let slot = (index as usize).checked_sub(1);
        Ok(slot.and_then(|i| self.object(id).slots.get(i).cloned()).unwrap_or(Value::Undefined))
    }

    fn set_slot(&mut self, obj: &Value, index: u32, value: Value) -> HostResult<()> {
        ops::check_receiver(obj)?;
        let (Some(id), Some(i)) = (obj.as_object(), (index as usize).checked_sub(1)) else {
            return Err(HostFault::reference_error(1069, format!("Slot {index} not found.")).into());
        };
        let slots = &mut self.object_mut(id).slots;
        if i >= slots.len() {
            slots.resize(i + 1, Value::Undefined);
        }
        slots[i] = value;
        Ok(())
    }

    fn next_index(&mut self, obj: &Value, index: u32) -> HostResult<u32> {
        let Some(id) = obj.as_object() else {
            return Ok(0);
        };
        let object = self.object(id);
        let count = object.props.len() + if let Kind::Array(items) = &object.kind { items.len() } else { 0 };
        Ok(if (index as usize) < count { index + 1 } else { 0 })
    }

    fn next_name(&mut self, obj: &Value, index: u32) -> HostResult<Value> {
        let Some(id) = obj.as_object() else {
            return Ok(Value::Undefined);
        };
        let object = self.object(id);
        let Some(mut i) = (index as usize).checked_sub(1) else {
            return Ok(Value::Undefined);
        };
        if let Kind::Array(items) = &object.kind {
            if i < items.len() {
                return Ok(Value::string(&i.to_string()));
            }
            i -= items.len();
        }
        Ok(object.props.get(i).map_or(Value::Undefined, |(k, _)| Value::String(k.clone())))
    }

    fn next_value(&mut self, obj: &Value, index: u32) -> HostResult<Value> {
        let Some(id) = obj.as_object() else {
            return Ok(Value::Undefined);
        };
        let object = self.object(id);
        let Some(mut i) = (index as usize).checked_sub(1) else {
            return Ok(Value::Undefined);
        };
        if let Kind::Array(items) = &object.kind {
            if i < items.len() {
                return Ok(items[i].clone());
            }
            i -= items.len();
        }
        Ok(object.props.get(i).map_or(Value::Undefined, |(_, v)| v.clone()))
    }

    fn make_error(&mut self, fault: &HostFault) -> Value {
        let class = self
            .classes
            .get(fault.kind.class_name())
            .or_else(|| self.classes.get("Error"))
            .copied();
        let mut object = Object::new(Kind::Plain, class);
        object.set_prop(Rc::from("message"), Value::string(&format!("Error #{}: {}", fault.code, fault.message)));
        object.set_prop(Rc::from("errorID"), Value::from_u32(fault.code));
        Value::Object(self.alloc(object))
    }

    fn domain_memory(&self) -> Option<Rc<RefCell<Vec<u8>>>> {
        self.memory.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_properties_and_arrays() {
        let mut host = SimpleHost::new();
        let obj = host.object_with(&[("x", Value::Int(1))]);
        assert_eq!(host.get_property(&obj, &Name::public("x")).unwrap(), Value::Int(1));
        host.set_property(&obj, &Name::public("y"), Value::Int(2)).unwrap();
        assert!(host.has_property(&obj, &Name::public("y")).unwrap());

        let arr = host.new_array(vec![Value::Int(7), Value::Int(8)]).unwrap();
        assert_eq!(host.get_property(&arr, &Name::public("1")).unwrap(), Value::Int(8));
        assert_eq!(host.get_property(&arr, &Name::public("length")).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_null_receiver_faults() {
        let mut host = SimpleHost::new();
        let err = host.get_property(&Value::Null, &Name::public("x")).unwrap_err();
        assert!(matches!(err, ExecError::Host(HostFault { code: 1009, .. })));
    }

    #[test]
    fn test_error_classes() {
        let mut host = SimpleHost::new();
        let fault = HostFault::type_error(1009, "null");
        let err = host.make_error(&fault);
        assert!(host.is_type(&err, &Name::public("TypeError")).unwrap());
        assert!(host.is_type(&err, &Name::public("Error")).unwrap());
        assert!(!host.is_type(&err, &Name::public("RangeError")).unwrap());
        assert_eq!(host.class_name_of(&err).as_deref(), Some("TypeError"));
    }

    #[test]
    fn test_construct_runs_inherited_initializer() {
        let mut host = SimpleHost::new();
        let range_error = host.global_property("RangeError");
        let err = host.construct(&range_error, &[Value::string("bad"), Value::Int(5)]).unwrap();
        assert_eq!(host.error_message(&err).as_deref(), Some("bad"));
        assert_eq!(host.get(&err, "errorID"), Value::Int(5));
        assert_eq!(ops::to_string(&mut host, &err).unwrap().as_ref(), "RangeError: bad");
    }

    #[test]
    fn test_builtin_conversions() {
        let mut host = SimpleHost::new();
        let int = host.global_property("int");
        assert_eq!(host.call(&int, &Value::Null, &[Value::Number(3.9)]).unwrap(), Value::Int(3));
        assert_eq!(host.coerce(Value::string("12"), &Name::public("int")).unwrap(), Value::Int(12));
        let math = host.global_property("Math");
        let max = host.get_property(&math, &Name::public("max")).unwrap();
        assert!(host.is_plain_function(&max));
        assert_eq!(host.call(&max, &math, &[Value::Int(2), Value::Int(9)]).unwrap(), Value::Int(9));
    }

    #[test]
    fn test_enumeration() {
        let mut host = SimpleHost::new();
        let obj = host.object_with(&[("a", Value::Int(1)), ("b", Value::Int(2))]);
        assert_eq!(host.next_index(&obj, 0).unwrap(), 1);
        assert_eq!(host.next_name(&obj, 2).unwrap(), Value::string("b"));
        assert_eq!(host.next_index(&obj, 2).unwrap(), 0);
    }

    impl SimpleHost {
        fn global_property(&self, key: &str) -> Value {
            self.get(&self.global(), key)
        }
    }
}
