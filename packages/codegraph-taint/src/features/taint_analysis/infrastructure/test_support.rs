//! Small programs and a wired-up manager for unit tests

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;

use super::alias_analyzer::AliasAnalyzer;
use super::backwards_icfg::BackwardsIcfg;
use super::manager::InfoflowManager;
use super::source_sink::MethodSourceSinkManager;
use super::summary_wrapper::{SummaryRule, SummaryTaintWrapper};
use super::type_utils::TypeUtils;
use crate::config::{ImplicitFlowMode, InfoflowConfig, Preset};
use crate::features::taint_analysis::domain::{Abstraction, CallLocation, SourceSinkDefinition};
use crate::features::taint_analysis::ports::{EdgeSubmitter, PathEdge};
use crate::shared::models::{
    BinOperator, Field, InvokeExpr, Local, MethodBuilder, MethodId, MethodSig, Program,
    ProgramBuilder, StmtHandle, StmtId, StmtKind, Type, Value, OBJECT_CLASS,
};

pub struct NoopSubmitter;

impl EdgeSubmitter for NoopSubmitter {
    fn submit_edge(&self, _edge: PathEdge) {}
}

#[derive(Default)]
pub struct RecordingSubmitter {
    edges: Mutex<Vec<PathEdge>>,
}

impl RecordingSubmitter {
    pub fn edges(&self) -> Vec<PathEdge> {
        self.edges.lock().clone()
    }
}

impl EdgeSubmitter for RecordingSubmitter {
    fn submit_edge(&self, edge: PathEdge) {
        self.edges.lock().push(edge);
    }
}

fn main_sig() -> MethodSig {
    MethodSig::new("Main", "main", vec![], Type::Void)
}

fn secret(ret: Type) -> MethodSig {
    MethodSig::new("Main", "secret", vec![], ret)
}

fn sink(param: Type) -> MethodSig {
    MethodSig::new("Main", "sink", vec![param], Type::Void)
}

/// Collects a program, its labeled statements and the collaborators
struct FixtureBuilder {
    program: ProgramBuilder,
    labels: Vec<(String, MethodSig, StmtHandle)>,
    definitions: Vec<SourceSinkDefinition>,
    summaries: Vec<SummaryRule>,
}

impl FixtureBuilder {
    fn new() -> Self {
        Self {
            program: ProgramBuilder::new(),
            labels: vec![],
            definitions: vec![],
            summaries: vec![],
        }
    }

    fn label(&mut self, name: &str, method: &MethodBuilder, handle: StmtHandle) {
        self.labels.push((name.to_string(), method.sig().clone(), handle));
    }

    /// `secret()` is a source, `sink(x)` a sink
    fn source_and_sink(&mut self, source_ret: Type, sink_param: Type) {
        let source = secret(source_ret);
        let sink = sink(sink_param);
        self.program
            .declare_method(source.clone(), true)
            .declare_method(sink.clone(), true);
        self.definitions.push(SourceSinkDefinition::source("secret", source));
        self.definitions.push(SourceSinkDefinition::sink("sink", sink));
    }

    fn build(self, config: InfoflowConfig) -> Fixture {
        let program = Arc::new(self.program.build().expect("fixture program"));
        let labels = self
            .labels
            .into_iter()
            .map(|(name, sig, handle)| {
                let method = program.find_method(&sig).expect("labeled method");
                (name, program.stmt_at(method, handle).expect("labeled stmt"))
            })
            .collect();

        let icfg = Arc::new(BackwardsIcfg::new(program.clone()));
        let aliasing = Arc::new(AliasAnalyzer::new(program.clone(), &config));
        let type_utils = TypeUtils::new(program.clone(), config.enable_type_checking);
        let mut manager = InfoflowManager::new(config, icfg, aliasing, type_utils)
            .with_source_sink_manager(Arc::new(MethodSourceSinkManager::new(self.definitions)));
        if !self.summaries.is_empty() {
            manager = manager.with_taint_wrapper(Arc::new(SummaryTaintWrapper::new(self.summaries)));
        }

        let (locals, fields) = collect_names(&program);
        Fixture {
            program,
            manager: Arc::new(manager),
            labels,
            locals,
            fields,
        }
    }
}

fn collect_names(program: &Program) -> (FxHashMap<String, Local>, FxHashMap<String, Field>) {
    let mut locals = FxHashMap::default();
    let mut fields = FxHashMap::default();
    for method in program.methods() {
        for &s in method.stmts() {
            let stmt = program.stmt(s);
            let mut values: Vec<Value> = vec![];
            values.extend(stmt.left_op());
            values.extend(stmt.right_op().cloned());
            values.extend(stmt.condition().cloned());
            match &stmt.kind {
                StmtKind::Return(Some(v)) | StmtKind::Throw(v) => values.push(v.clone()),
                StmtKind::Invoke(inv) => values.push(Value::Invoke(inv.clone())),
                _ => {}
            }
            let nested: Vec<Value> = values.iter().flat_map(|v| v.uses()).collect();
            for value in values.into_iter().chain(nested) {
                match value {
                    Value::Local(l) => {
                        locals.entry(l.name.clone()).or_insert(l);
                    }
                    Value::InstanceField { base, field } => {
                        locals.entry(base.name.clone()).or_insert(base);
                        fields.entry(field.name.clone()).or_insert(field);
                    }
                    Value::StaticField(field) => {
                        fields.entry(field.name.clone()).or_insert(field);
                    }
                    _ => {}
                }
            }
        }
    }
    (locals, fields)
}

pub struct Fixture {
    pub program: Arc<Program>,
    pub manager: Arc<InfoflowManager>,
    labels: FxHashMap<String, StmtId>,
    locals: FxHashMap<String, Local>,
    fields: FxHashMap<String, Field>,
}

impl Fixture {
    /// Balanced preset on a single solver thread
    pub fn config() -> InfoflowConfig {
        InfoflowConfig {
            solver_threads: 1,
            ..InfoflowConfig::from_preset(Preset::Balanced)
        }
    }

    pub fn source_then_sink() -> Self {
        Self::source_then_sink_with(Self::config())
    }

    /// s = secret(); t = s; sink(t)
    pub fn source_then_sink_with(config: InfoflowConfig) -> Self {
        let mut fb = FixtureBuilder::new();
        fb.source_and_sink(Type::string(), Type::string());
        let s = Local::new("s", Type::string());
        let t = Local::new("t", Type::string());

        let mut m = MethodBuilder::static_method(main_sig());
        let h = m.assign(&s, Value::static_call(secret(Type::string()), vec![]));
        fb.label("source", &m, h);
        let h = m.assign(&t, Value::local(&s));
        fb.label("copy", &m, h);
        let h = m.invoke(InvokeExpr::static_call(sink(Type::string()), vec![Value::local(&t)]));
        fb.label("sink", &m, h);
        m.ret_void();

        fb.program.add_method(m);
        fb.build(config)
    }

    /// b = new C; a = b; a.f = x
    pub fn field_write_through_copy() -> Self {
        let mut fb = FixtureBuilder::new();
        let class = Type::class("C");
        let f = Field::instance("C", "f", Type::string());
        let b = Local::new("b", class.clone());
        let a = Local::new("a", class.clone());

        let mut m = MethodBuilder::static_method(MethodSig::new(
            "Main",
            "main",
            vec![Type::string()],
            Type::Void,
        ));
        let x = m.param(0, "x");
        let h = m.assign(&b, Value::New(class));
        fb.label("alloc", &m, h);
        let h = m.assign(&a, Value::local(&b));
        fb.label("copy", &m, h);
        let h = m.assign(Value::field(&a, &f), Value::local(&x));
        fb.label("write", &m, h);
        m.ret_void();

        fb.program.add_class("C", Some(OBJECT_CLASS)).add_method(m);
        fb.build(Self::config())
    }

    pub fn implicit_branch() -> Self {
        Self::implicit_branch_with(ImplicitFlowMode::AllImplicitFlows)
    }

    /// z = secret(); if z == 0 { y = 2 } else { y = 1 }; sink(y)
    pub fn implicit_branch_with(mode: ImplicitFlowMode) -> Self {
        let mut fb = FixtureBuilder::new();
        fb.source_and_sink(Type::Int, Type::Int);
        let z = Local::new("z", Type::Int);
        let y = Local::new("y", Type::Int);

        let mut m = MethodBuilder::static_method(main_sig());
        let h = m.assign(&z, Value::static_call(secret(Type::Int), vec![]));
        fb.label("source", &m, h);
        let h = m.if_goto(Value::binop(BinOperator::Eq, Value::local(&z), Value::int(0)), "else");
        fb.label("branch", &m, h);
        let h = m.assign(&y, Value::int(1));
        fb.label("then", &m, h);
        m.goto("end");
        m.label("else");
        let h = m.assign(&y, Value::int(2));
        fb.label("else", &m, h);
        m.label("end");
        let h = m.invoke(InvokeExpr::static_call(sink(Type::Int), vec![Value::local(&y)]));
        fb.label("sink", &m, h);
        m.ret_void();

        fb.program.add_method(m);
        fb.build(InfoflowConfig {
            implicit_flow_mode: mode,
            ..Self::config()
        })
    }

    /// try { ex = new Exception; throw ex } catch (e) { sink(e) }
    pub fn throw_and_catch() -> Self {
        let mut fb = FixtureBuilder::new();
        let exception = Type::class("java.lang.Exception");
        fb.source_and_sink(exception.clone(), Type::object());
        let ex = Local::new("ex", exception.clone());

        let mut m = MethodBuilder::static_method(main_sig());
        m.label("try");
        let h = m.assign(&ex, Value::New(exception.clone()));
        fb.label("alloc", &m, h);
        let h = m.throw(Value::local(&ex));
        fb.label("throw", &m, h);
        m.label("handler");
        let e = m.catch("e", exception);
        fb.label("catch", &m, StmtHandle(h.0 + 1));
        let h = m.invoke(InvokeExpr::static_call(sink(Type::object()), vec![Value::local(&e)]));
        fb.label("sink", &m, h);
        m.ret_void();
        m.trap("try", "handler", "handler");

        fb.program.add_method(m);
        fb.build(Self::config())
    }

    /// fail(flag) { if flag == 0 goto other; io = new IOException; throw io;
    /// other: sql = new SQLException; throw sql }
    /// main() { try { fail(0) } catch (IOException e) { sink(e) } }
    pub fn throwing_callee() -> Self {
        let mut fb = FixtureBuilder::new();
        let exception = "java.lang.Exception";
        let io_type = Type::class("java.io.IOException");
        let sql_type = Type::class("java.sql.SQLException");
        fb.source_and_sink(Type::string(), Type::object());

        let fail = MethodSig::new("Main", "fail", vec![Type::Int], Type::Void);
        let mut helper = MethodBuilder::static_method(fail.clone());
        let flag = helper.param(0, "flag");
        let io = Local::new("io", io_type.clone());
        let sql = Local::new("sql", sql_type.clone());
        helper.if_goto(Value::binop(BinOperator::Eq, Value::local(&flag), Value::int(0)), "other");
        helper.assign(&io, Value::New(io_type.clone()));
        let h = helper.throw(Value::local(&io));
        fb.label("throw_io", &helper, h);
        helper.label("other");
        helper.assign(&sql, Value::New(sql_type.clone()));
        let h = helper.throw(Value::local(&sql));
        fb.label("throw_sql", &helper, h);

        let mut m = MethodBuilder::static_method(main_sig());
        m.label("try");
        let h = m.invoke(InvokeExpr::static_call(fail, vec![Value::int(0)]));
        fb.label("call", &m, h);
        m.goto("end");
        m.label("handler");
        let e = m.catch("e", io_type);
        m.invoke(InvokeExpr::static_call(sink(Type::object()), vec![Value::local(&e)]));
        m.label("end");
        m.ret_void();
        m.trap("try", "handler", "handler");

        fb.program
            .add_class(exception, Some(OBJECT_CLASS))
            .add_class("java.io.IOException", Some(exception))
            .add_class("java.sql.SQLException", Some(exception))
            .add_method(helper)
            .add_method(m);
        fb.build(Self::config())
    }

    /// Instance method: a = secret(); b = secret(); sink2(a, b), where
    /// "first" checks `a` and "second" checks `b`
    pub fn two_sink_locations() -> Self {
        let mut fb = FixtureBuilder::new();
        let source = secret(Type::string());
        let sink2 = MethodSig::new("Main", "sink2", vec![Type::string(), Type::string()], Type::Void);
        fb.program
            .declare_method(source.clone(), true)
            .declare_method(sink2.clone(), true);
        fb.definitions.push(SourceSinkDefinition::source("secret", source.clone()));
        fb.definitions.push(
            SourceSinkDefinition::sink("first", sink2.clone()).with_locations(vec![CallLocation::Parameter(0)]),
        );
        fb.definitions.push(
            SourceSinkDefinition::sink("second", sink2.clone()).with_locations(vec![CallLocation::Parameter(1)]),
        );

        let a = Local::new("a", Type::string());
        let b = Local::new("b", Type::string());
        let mut m = MethodBuilder::instance_method(MethodSig::new("Main", "run", vec![], Type::Void));
        m.this_ref("this");
        m.assign(&a, Value::static_call(source.clone(), vec![]));
        m.assign(&b, Value::static_call(source, vec![]));
        let h = m.invoke(InvokeExpr::static_call(sink2, vec![Value::local(&a), Value::local(&b)]));
        fb.label("sink", &m, h);
        m.ret_void();

        fb.program.add_class("Main", Some(OBJECT_CLASS)).add_method(m);
        fb.build(InfoflowConfig {
            implicit_flow_mode: ImplicitFlowMode::AllImplicitFlows,
            ..Self::config()
        })
    }

    /// i = index(); k = count(); a = new String[k]; y = a[i]; n = a.length
    pub fn array_accesses() -> Self {
        let mut fb = FixtureBuilder::new();
        let index = MethodSig::new("Main", "index", vec![], Type::Int);
        let count = MethodSig::new("Main", "count", vec![], Type::Int);
        fb.program
            .declare_method(index.clone(), true)
            .declare_method(count.clone(), true);
        let i = Local::new("i", Type::Int);
        let k = Local::new("k", Type::Int);
        let a = Local::new("a", Type::array_of(Type::string()));
        let y = Local::new("y", Type::string());
        let n = Local::new("n", Type::Int);

        let mut m = MethodBuilder::static_method(main_sig());
        m.assign(&i, Value::static_call(index, vec![]));
        let h = m.assign(&k, Value::static_call(count, vec![]));
        fb.label("size", &m, h);
        let h = m.assign(&a, Value::new_array(Type::string(), Value::local(&k)));
        fb.label("alloc", &m, h);
        let h = m.assign(&y, Value::array_ref(&a, Value::local(&i)));
        fb.label("read", &m, h);
        let h = m.assign(&n, Value::length(&a));
        fb.label("length", &m, h);
        m.ret_void();

        fb.program.add_method(m);
        fb.build(InfoflowConfig {
            enable_array_size_tainting: true,
            ..Self::config()
        })
    }

    /// s = secret(); t = String.valueOf(s); sink(t), with valueOf modeled
    pub fn library_call() -> Self {
        let mut fb = FixtureBuilder::new();
        fb.source_and_sink(Type::string(), Type::string());
        let value_of = MethodSig::new(
            "java.lang.String",
            "valueOf",
            vec![Type::object()],
            Type::string(),
        );
        fb.program
            .add_library_class("java.lang.String", Some(OBJECT_CLASS))
            .declare_method(value_of.clone(), true);
        fb.summaries.push(SummaryRule {
            method: value_of.clone(),
            from: CallLocation::Parameter(0),
            to: CallLocation::Return,
            exclusive: true,
        });
        let s = Local::new("s", Type::string());
        let t = Local::new("t", Type::string());

        let mut m = MethodBuilder::static_method(main_sig());
        let h = m.assign(&s, Value::static_call(secret(Type::string()), vec![]));
        fb.label("source", &m, h);
        let h = m.assign(&t, Value::static_call(value_of, vec![Value::local(&s)]));
        fb.label("wrap", &m, h);
        let h = m.invoke(InvokeExpr::static_call(sink(Type::string()), vec![Value::local(&t)]));
        fb.label("sink", &m, h);
        m.ret_void();

        fb.program.add_method(m);
        fb.build(Self::config())
    }

    /// s = secret(); t = id(s); sink(t), with `id` returning its argument
    pub fn helper_call() -> Self {
        let mut fb = FixtureBuilder::new();
        fb.source_and_sink(Type::string(), Type::string());
        let id = MethodSig::new("Main", "id", vec![Type::string()], Type::string());
        let mut helper = MethodBuilder::static_method(id.clone());
        let p = helper.param(0, "p");
        let h = helper.ret(Value::local(&p));
        fb.label("id_return", &helper, h);

        let s = Local::new("s", Type::string());
        let t = Local::new("t", Type::string());
        let mut m = MethodBuilder::static_method(main_sig());
        let h = m.assign(&s, Value::static_call(secret(Type::string()), vec![]));
        fb.label("source", &m, h);
        let h = m.assign(&t, Value::static_call(id, vec![Value::local(&s)]));
        fb.label("call", &m, h);
        let h = m.invoke(InvokeExpr::static_call(sink(Type::string()), vec![Value::local(&t)]));
        fb.label("sink", &m, h);
        m.ret_void();

        fb.program.add_method(helper).add_method(m);
        fb.build(Self::config())
    }

    /// v = Config.KEY; sink(v), with `Config.<clinit>` writing KEY
    pub fn static_initializer() -> Self {
        let mut fb = FixtureBuilder::new();
        fb.source_and_sink(Type::string(), Type::string());
        let key = Field::static_field("Config", "KEY", Type::string());

        let mut clinit = MethodBuilder::static_method(MethodSig::new(
            "Config",
            "<clinit>",
            vec![],
            Type::Void,
        ));
        clinit.assign(Value::static_field(&key), Value::static_call(secret(Type::string()), vec![]));
        clinit.ret_void();

        let v = Local::new("v", Type::string());
        let mut m = MethodBuilder::static_method(main_sig());
        fb.label("entry", &m, StmtHandle(0));
        let h = m.assign(&v, Value::static_field(&key));
        fb.label("read", &m, h);
        let h = m.invoke(InvokeExpr::static_call(sink(Type::string()), vec![Value::local(&v)]));
        fb.label("sink", &m, h);
        m.ret_void();

        fb.program
            .add_class("Config", Some(OBJECT_CLASS))
            .add_class("Main", Some(OBJECT_CLASS))
            .add_method(clinit)
            .add_method(m);
        fb.build(Self::config())
    }

    /// b = o instanceof C, with `o` a parameter
    pub fn instance_check(taint_operand: bool) -> Self {
        let mut fb = FixtureBuilder::new();
        let mut m = MethodBuilder::static_method(MethodSig::new(
            "Main",
            "check",
            vec![Type::object()],
            Type::Void,
        ));
        let o = m.param(0, "o");
        let b = Local::new("b", Type::Boolean);
        let h = m.assign(&b, Value::instance_of(Type::class("C"), Value::local(&o)));
        fb.label("check", &m, h);
        fb.label("entry", &m, StmtHandle(0));
        m.ret_void();

        fb.program.add_class("C", Some(OBJECT_CLASS)).add_method(m);
        fb.build(InfoflowConfig {
            enable_instance_of_tainting: taint_operand,
            ..Self::config()
        })
    }

    /// o = new Object; specialinvoke o.<java.lang.Object: void <init>()>
    pub fn system_calls() -> Self {
        let mut fb = FixtureBuilder::new();
        let init = MethodSig::new(OBJECT_CLASS, "<init>", vec![], Type::Void);
        fb.program
            .add_library_class(OBJECT_CLASS, None)
            .declare_method(init.clone(), false);
        let o = Local::new("o", Type::object());

        let mut m = MethodBuilder::static_method(main_sig());
        m.assign(&o, Value::New(Type::object()));
        let h = m.invoke(InvokeExpr::special_call(&o, init, vec![]));
        fb.label("init", &m, h);
        m.ret_void();

        fb.program.add_method(m);
        fb.build(Self::config())
    }

    pub fn stmt(&self, label: &str) -> StmtId {
        self.labels[label]
    }

    pub fn method(&self, name: &str) -> MethodId {
        self.program
            .methods()
            .find(|m| m.sig.name == name)
            .map(|m| m.id)
            .expect("fixture method")
    }

    pub fn local(&self, name: &str) -> Local {
        self.locals
            .get(name)
            .cloned()
            .unwrap_or_else(|| Local::new(name, Type::string()))
    }

    fn root(&self, value: Value) -> Abstraction {
        let ap = self
            .manager
            .access_path_factory()
            .create_access_path(&value, true)
            .expect("fact access path");
        let anchor = self
            .program
            .methods()
            .find_map(|m| m.entry())
            .expect("a method body");
        let root = Abstraction::new_root(vec![], ap, anchor, None, false, false).with_current_stmt(None);
        self.manager.arena().register(root)
    }

    /// Active fact on a local of the program (a fresh string local if unknown)
    pub fn fact_on(&self, name: &str) -> Abstraction {
        self.root(Value::Local(self.local(name)))
    }

    pub fn field_fact_on(&self, base: &str, field: &str) -> Abstraction {
        let field = self.fields.get(field).cloned().expect("fixture field");
        self.root(Value::field(&self.local(base), &field))
    }
}
