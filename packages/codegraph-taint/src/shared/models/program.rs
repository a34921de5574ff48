//! Whole-program model: classes, method bodies, control-flow edges and call edges
//!
//! Built once through [`ProgramBuilder`] and read-only afterwards. Every
//! method body starts with an entry `nop`, so each call has at least one
//! statement in front of it.

use rustc_hash::{FxHashMap, FxHashSet};

use super::ir::{
    InvokeExpr, InvokeKind, Local, MethodId, MethodSig, Stmt, StmtId, StmtKind, Type, Value,
    STATIC_INITIALIZER_NAME,
};
use crate::errors::{Result, TaintError};

// ============================================================================
// Program
// ============================================================================

/// Class declaration
#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub name: String,
    pub superclass: Option<String>,
    pub interfaces: Vec<String>,
    /// Library (system) class, not part of the analyzed application
    pub is_library: bool,
}

/// Analyzed method body
#[derive(Debug, Clone)]
pub struct Body {
    /// Statements in layout order, entry `nop` first
    pub stmts: Vec<StmtId>,
    pub this_local: Option<Local>,
    pub param_locals: Vec<Option<Local>>,
}

#[derive(Debug, Clone)]
pub struct Method {
    pub id: MethodId,
    pub sig: MethodSig,
    pub is_static: bool,
    pub is_native: bool,
    /// `None` for phantom, abstract or native methods
    pub body: Option<Body>,
}

impl Method {
    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    pub fn entry(&self) -> Option<StmtId> {
        self.body.as_ref().and_then(|b| b.stmts.first().copied())
    }

    pub fn this_local(&self) -> Option<&Local> {
        self.body.as_ref().and_then(|b| b.this_local.as_ref())
    }

    pub fn parameter_local(&self, index: usize) -> Option<&Local> {
        self.body
            .as_ref()
            .and_then(|b| b.param_locals.get(index))
            .and_then(|l| l.as_ref())
    }

    pub fn stmts(&self) -> &[StmtId] {
        self.body.as_ref().map(|b| b.stmts.as_slice()).unwrap_or(&[])
    }
}

/// Immutable program model
#[derive(Debug)]
pub struct Program {
    classes: FxHashMap<String, ClassInfo>,
    methods: Vec<Method>,
    method_index: FxHashMap<MethodSig, MethodId>,
    stmts: Vec<Stmt>,
    succs: Vec<Vec<StmtId>>,
    preds: Vec<Vec<StmtId>>,
    exceptional_edges: FxHashSet<(StmtId, StmtId)>,
    call_targets: FxHashMap<StmtId, Vec<MethodId>>,
    callers: FxHashMap<MethodId, Vec<StmtId>>,
}

impl Program {
    pub fn stmt(&self, id: StmtId) -> &Stmt {
        &self.stmts[id.index()]
    }

    pub fn stmt_count(&self) -> usize {
        self.stmts.len()
    }

    pub fn method(&self, id: MethodId) -> &Method {
        &self.methods[id.index()]
    }

    pub fn methods(&self) -> impl Iterator<Item = &Method> {
        self.methods.iter()
    }

    pub fn method_of(&self, stmt: StmtId) -> MethodId {
        self.stmt(stmt).method
    }

    pub fn find_method(&self, sig: &MethodSig) -> Option<MethodId> {
        self.method_index.get(sig).copied()
    }

    /// Statement at a builder position inside a method body
    pub fn stmt_at(&self, method: MethodId, handle: StmtHandle) -> Option<StmtId> {
        self.method(method).stmts().get(handle.0).copied()
    }

    /// Forward control-flow successors (normal and exceptional)
    pub fn succs(&self, stmt: StmtId) -> &[StmtId] {
        &self.succs[stmt.index()]
    }

    /// Forward control-flow predecessors
    pub fn preds(&self, stmt: StmtId) -> &[StmtId] {
        &self.preds[stmt.index()]
    }

    pub fn is_exceptional_edge(&self, from: StmtId, to: StmtId) -> bool {
        self.exceptional_edges.contains(&(from, to))
    }

    /// Resolved targets of the call at `stmt`
    pub fn callees(&self, stmt: StmtId) -> &[MethodId] {
        self.call_targets
            .get(&stmt)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn callers(&self, method: MethodId) -> &[StmtId] {
        self.callers
            .get(&method)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn class(&self, name: &str) -> Option<&ClassInfo> {
        self.classes.get(name)
    }

    /// Library classes and the `java.*` / `javax.*` namespaces
    pub fn is_library_class(&self, name: &str) -> bool {
        match self.classes.get(name) {
            Some(class) => class.is_library,
            None => name.starts_with("java.") || name.starts_with("javax."),
        }
    }

    /// Whether `child` equals or transitively extends/implements `parent`.
    /// `None` when the hierarchy above `child` is not fully known.
    pub fn is_subclass_of(&self, child: &str, parent: &str) -> Option<bool> {
        let mut visited = FxHashSet::default();
        let mut worklist = vec![child.to_string()];
        let mut complete = true;
        while let Some(current) = worklist.pop() {
            if current == parent {
                return Some(true);
            }
            if !visited.insert(current.clone()) {
                continue;
            }
            match self.classes.get(&current) {
                Some(info) => {
                    worklist.extend(info.superclass.iter().cloned());
                    worklist.extend(info.interfaces.iter().cloned());
                }
                None if current != super::ir::OBJECT_CLASS => complete = false,
                None => {}
            }
        }
        if complete {
            Some(false)
        } else {
            None
        }
    }

    /// Walk a class and its superclasses for a method with `sub_signature`
    fn resolve_in_hierarchy(&self, class: &str, sub_signature: &str) -> Option<MethodId> {
        let mut current = Some(class.to_string());
        while let Some(name) = current {
            let hit = self
                .methods
                .iter()
                .find(|m| m.sig.class == name && m.sig.sub_signature() == sub_signature);
            if let Some(m) = hit {
                return Some(m.id);
            }
            current = self.classes.get(&name).and_then(|c| c.superclass.clone());
        }
        None
    }

    /// Class-hierarchy resolution of an invoke expression
    fn resolve_call(&self, inv: &InvokeExpr) -> Vec<MethodId> {
        let sub_sig = inv.method.sub_signature();
        let mut targets = Vec::new();
        if let Some(id) = self.resolve_in_hierarchy(&inv.method.class, &sub_sig) {
            targets.push(id);
        }
        if matches!(inv.kind, InvokeKind::Virtual | InvokeKind::Interface) {
            for m in &self.methods {
                if m.is_static || m.sig.sub_signature() != sub_sig || targets.contains(&m.id) {
                    continue;
                }
                if self.is_subclass_of(&m.sig.class, &inv.method.class) == Some(true) {
                    targets.push(m.id);
                }
            }
        }
        targets
    }
}

/// Class whose initialization an assignment may trigger
fn initialized_class(stmt: &Stmt) -> Option<&str> {
    let StmtKind::Assign { left, right } = &stmt.kind else {
        return None;
    };
    match (left, right) {
        (_, Value::StaticField(field)) | (Value::StaticField(field), _) => {
            Some(field.declaring_class.as_str())
        }
        (_, Value::New(Type::Ref(class))) => Some(class.as_str()),
        _ => None,
    }
}

// ============================================================================
// Builders
// ============================================================================

/// Position of a statement inside a method body (entry `nop` is position 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StmtHandle(pub usize);

#[derive(Debug, Clone)]
enum Jump {
    FallThrough,
    Goto(String),
    If(String),
    Switch(Vec<String>, String),
    Exit,
}

#[derive(Debug, Clone)]
struct Trap {
    begin: String,
    end: String,
    handler: String,
}

/// Builds one method body
#[derive(Debug, Clone)]
pub struct MethodBuilder {
    sig: MethodSig,
    is_static: bool,
    stmts: Vec<(StmtKind, Jump)>,
    labels: FxHashMap<String, usize>,
    traps: Vec<Trap>,
    this_local: Option<Local>,
    param_locals: Vec<Option<Local>>,
}

impl MethodBuilder {
    fn new(sig: MethodSig, is_static: bool) -> Self {
        let param_locals = vec![None; sig.params.len()];
        Self {
            sig,
            is_static,
            stmts: vec![(StmtKind::Nop, Jump::FallThrough)],
            labels: FxHashMap::default(),
            traps: Vec::new(),
            this_local: None,
            param_locals,
        }
    }

    pub fn static_method(sig: MethodSig) -> Self {
        Self::new(sig, true)
    }

    pub fn instance_method(sig: MethodSig) -> Self {
        Self::new(sig, false)
    }

    pub fn sig(&self) -> &MethodSig {
        &self.sig
    }

    fn push(&mut self, kind: StmtKind, jump: Jump) -> StmtHandle {
        self.stmts.push((kind, jump));
        StmtHandle(self.stmts.len() - 1)
    }

    /// `this := @this: C`
    pub fn this_ref(&mut self, name: &str) -> Local {
        let ty = Type::class(self.sig.class.clone());
        let local = Local::new(name, ty.clone());
        self.push(
            StmtKind::Identity {
                left: local.clone(),
                right: Value::ThisRef(ty),
            },
            Jump::FallThrough,
        );
        self.this_local = Some(local.clone());
        local
    }

    /// `name := @parameterN: T`
    pub fn param(&mut self, index: usize, name: &str) -> Local {
        let ty = self.sig.params.get(index).cloned().unwrap_or(Type::Unknown);
        let local = Local::new(name, ty.clone());
        self.push(
            StmtKind::Identity {
                left: local.clone(),
                right: Value::ParameterRef { index, ty },
            },
            Jump::FallThrough,
        );
        if index >= self.param_locals.len() {
            self.param_locals.resize(index + 1, None);
        }
        self.param_locals[index] = Some(local.clone());
        local
    }

    /// `name := @caughtexception`
    pub fn catch(&mut self, name: &str, exception: Type) -> Local {
        let local = Local::new(name, exception.clone());
        self.push(
            StmtKind::Identity {
                left: local.clone(),
                right: Value::CaughtException(exception),
            },
            Jump::FallThrough,
        );
        local
    }

    /// Binds `name` to the next statement
    pub fn label(&mut self, name: &str) -> &mut Self {
        self.labels.insert(name.to_string(), self.stmts.len());
        self
    }

    pub fn assign(&mut self, left: impl Into<Value>, right: Value) -> StmtHandle {
        self.push(
            StmtKind::Assign {
                left: left.into(),
                right,
            },
            Jump::FallThrough,
        )
    }

    pub fn invoke(&mut self, inv: InvokeExpr) -> StmtHandle {
        self.push(StmtKind::Invoke(inv), Jump::FallThrough)
    }

    /// Branches to `target` when `condition` holds, falls through otherwise
    pub fn if_goto(&mut self, condition: Value, target: &str) -> StmtHandle {
        self.push(StmtKind::If { condition }, Jump::If(target.to_string()))
    }

    pub fn goto(&mut self, target: &str) -> StmtHandle {
        self.push(StmtKind::Goto, Jump::Goto(target.to_string()))
    }

    pub fn switch(&mut self, key: Value, targets: &[&str], default: &str) -> StmtHandle {
        let targets = targets.iter().map(|t| t.to_string()).collect();
        self.push(
            StmtKind::Switch { key },
            Jump::Switch(targets, default.to_string()),
        )
    }

    pub fn ret(&mut self, value: Value) -> StmtHandle {
        self.push(StmtKind::Return(Some(value)), Jump::Exit)
    }

    pub fn ret_void(&mut self) -> StmtHandle {
        self.push(StmtKind::Return(None), Jump::Exit)
    }

    pub fn throw(&mut self, value: Value) -> StmtHandle {
        self.push(StmtKind::Throw(value), Jump::Exit)
    }

    pub fn nop(&mut self) -> StmtHandle {
        self.push(StmtKind::Nop, Jump::FallThrough)
    }

    /// Statements in `[begin, end)` may transfer control to `handler`
    pub fn trap(&mut self, begin: &str, end: &str, handler: &str) -> &mut Self {
        self.traps.push(Trap {
            begin: begin.to_string(),
            end: end.to_string(),
            handler: handler.to_string(),
        });
        self
    }

    fn resolve_label(&self, label: &str) -> Result<usize> {
        match self.labels.get(label) {
            Some(&pos) if pos < self.stmts.len() => Ok(pos),
            _ => Err(TaintError::UnresolvedLabel {
                method: self.sig.to_string(),
                label: label.to_string(),
            }),
        }
    }

    /// Trap ends may point one past the last statement
    fn resolve_range_end(&self, label: &str) -> Result<usize> {
        match self.labels.get(label) {
            Some(&pos) => Ok(pos),
            None => Err(TaintError::UnresolvedLabel {
                method: self.sig.to_string(),
                label: label.to_string(),
            }),
        }
    }
}

/// Assembles a [`Program`]
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    classes: FxHashMap<String, ClassInfo>,
    declared: Vec<(MethodSig, bool, bool)>,
    bodies: Vec<MethodBuilder>,
    explicit_edges: Vec<(MethodSig, StmtHandle, MethodSig)>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_class(&mut self, name: &str, superclass: Option<&str>) -> &mut Self {
        self.add_class_info(ClassInfo {
            name: name.to_string(),
            superclass: superclass.map(str::to_string),
            interfaces: Vec::new(),
            is_library: false,
        })
    }

    pub fn add_library_class(&mut self, name: &str, superclass: Option<&str>) -> &mut Self {
        self.add_class_info(ClassInfo {
            name: name.to_string(),
            superclass: superclass.map(str::to_string),
            interfaces: Vec::new(),
            is_library: true,
        })
    }

    pub fn add_class_info(&mut self, info: ClassInfo) -> &mut Self {
        self.classes.insert(info.name.clone(), info);
        self
    }

    /// Method without a body (library, abstract or phantom)
    pub fn declare_method(&mut self, sig: MethodSig, is_static: bool) -> &mut Self {
        self.declared.push((sig, is_static, false));
        self
    }

    pub fn declare_native_method(&mut self, sig: MethodSig, is_static: bool) -> &mut Self {
        self.declared.push((sig, is_static, true));
        self
    }

    pub fn add_method(&mut self, method: MethodBuilder) -> &mut Self {
        self.bodies.push(method);
        self
    }

    /// Overrides hierarchy-based resolution for one call site
    pub fn add_call_edge(
        &mut self,
        caller: &MethodSig,
        call: StmtHandle,
        target: &MethodSig,
    ) -> &mut Self {
        self.explicit_edges
            .push((caller.clone(), call, target.clone()));
        self
    }

    pub fn build(self) -> Result<Program> {
        let mut program = Program {
            classes: self.classes,
            methods: Vec::new(),
            method_index: FxHashMap::default(),
            stmts: Vec::new(),
            succs: Vec::new(),
            preds: Vec::new(),
            exceptional_edges: FxHashSet::default(),
            call_targets: FxHashMap::default(),
            callers: FxHashMap::default(),
        };

        for (sig, is_static, is_native) in self.declared {
            let id = MethodId(program.methods.len() as u32);
            program.method_index.insert(sig.clone(), id);
            program.methods.push(Method {
                id,
                sig,
                is_static,
                is_native,
                body: None,
            });
        }

        for mb in &self.bodies {
            let id = MethodId(program.methods.len() as u32);
            let base = program.stmts.len() as u32;
            let ids: Vec<StmtId> = (0..mb.stmts.len())
                .map(|i| StmtId(base + i as u32))
                .collect();

            for (i, (kind, _)) in mb.stmts.iter().enumerate() {
                program.stmts.push(Stmt {
                    id: ids[i],
                    method: id,
                    kind: kind.clone(),
                });
                program.succs.push(Vec::new());
                program.preds.push(Vec::new());
            }

            let add_edge = |program: &mut Program, from: usize, to: usize| {
                let (f, t) = (ids[from], ids[to]);
                if !program.succs[f.index()].contains(&t) {
                    program.succs[f.index()].push(t);
                    program.preds[t.index()].push(f);
                }
            };

            for (i, (_, jump)) in mb.stmts.iter().enumerate() {
                let next = i + 1;
                match jump {
                    Jump::FallThrough => {
                        if next < mb.stmts.len() {
                            add_edge(&mut program, i, next);
                        }
                    }
                    Jump::Goto(target) => {
                        let t = mb.resolve_label(target)?;
                        add_edge(&mut program, i, t);
                    }
                    Jump::If(target) => {
                        if next < mb.stmts.len() {
                            add_edge(&mut program, i, next);
                        }
                        let t = mb.resolve_label(target)?;
                        add_edge(&mut program, i, t);
                    }
                    Jump::Switch(targets, default) => {
                        for target in targets {
                            let t = mb.resolve_label(target)?;
                            add_edge(&mut program, i, t);
                        }
                        let d = mb.resolve_label(default)?;
                        add_edge(&mut program, i, d);
                    }
                    Jump::Exit => {}
                }
            }

            for trap in &mb.traps {
                let begin = mb.resolve_label(&trap.begin)?;
                let end = mb.resolve_range_end(&trap.end)?;
                let handler = mb.resolve_label(&trap.handler)?;
                for i in begin..end.min(mb.stmts.len()) {
                    if matches!(
                        mb.stmts[i].0,
                        StmtKind::Nop | StmtKind::Goto | StmtKind::Identity { .. }
                    ) {
                        continue;
                    }
                    add_edge(&mut program, i, handler);
                    program.exceptional_edges.insert((ids[i], ids[handler]));
                }
            }

            program.method_index.insert(mb.sig.clone(), id);
            program.methods.push(Method {
                id,
                sig: mb.sig.clone(),
                is_static: mb.is_static,
                is_native: false,
                body: Some(Body {
                    stmts: ids,
                    this_local: mb.this_local.clone(),
                    param_locals: mb.param_locals.clone(),
                }),
            });
        }

        // Call edges
        let mut explicit: FxHashMap<StmtId, Vec<MethodId>> = FxHashMap::default();
        for (caller, handle, target) in &self.explicit_edges {
            let caller_id = program
                .find_method(caller)
                .ok_or_else(|| TaintError::UnknownMethod(caller.to_string()))?;
            let target_id = program
                .find_method(target)
                .ok_or_else(|| TaintError::UnknownMethod(target.to_string()))?;
            let stmt = program.stmt_at(caller_id, *handle).ok_or_else(|| {
                TaintError::invalid_state(format!("no statement {} in {}", handle.0, caller))
            })?;
            explicit.entry(stmt).or_default().push(target_id);
        }

        let mut call_targets = FxHashMap::default();
        for stmt in &program.stmts {
            let Some(inv) = stmt.invoke_expr() else {
                continue;
            };
            let targets = match explicit.remove(&stmt.id) {
                Some(targets) => targets,
                None => program.resolve_call(inv),
            };
            if !targets.is_empty() {
                call_targets.insert(stmt.id, targets);
            }
        }
        // First use of another class may run its static initializer
        for stmt in &program.stmts {
            if stmt.contains_invoke() {
                continue;
            }
            let Some(class) = initialized_class(stmt) else {
                continue;
            };
            if program.method(stmt.method).sig.class == class {
                continue;
            }
            let sig = MethodSig::new(class, STATIC_INITIALIZER_NAME, vec![], Type::Void);
            if let Some(id) = program.find_method(&sig) {
                if program.method(id).has_body() {
                    call_targets.insert(stmt.id, vec![id]);
                }
            }
        }
        let mut callers: FxHashMap<MethodId, Vec<StmtId>> = FxHashMap::default();
        for (stmt, targets) in &call_targets {
            for target in targets {
                callers.entry(*target).or_default().push(*stmt);
            }
        }
        for sites in callers.values_mut() {
            sites.sort();
        }
        program.call_targets = call_targets;
        program.callers = callers;

        Ok(program)
    }
}
