/*
 * Backward Taint Problem
 *
 * The IFDS problem searched from sinks back to sources. Every flow function
 * first consults the rule chain, then applies the base transfer for the
 * statement:
 *
 *   normal:          `x = y` turns a fact on x into a fact on y
 *   call:            a fact on the result maps to the callee's returned
 *                    values, the receiver to `this`, arguments to parameters
 *   return:          `this` and parameters map back onto the call site
 *   call-to-return:  facts the callee cannot touch skip the call
 *
 * Facts created inside a branch carry the branch as dominator while control
 * dependencies are tracked.
 */

use rustc_hash::FxHashSet;
use std::sync::Arc;

use crate::features::taint_analysis::domain::{Abstraction, AccessPath, ArrayTaintType};
use crate::features::taint_analysis::infrastructure::base_selector::select_base_list;
use crate::features::taint_analysis::infrastructure::ifds_framework::IFDSProblem;
use crate::features::taint_analysis::infrastructure::manager::InfoflowManager;
use crate::features::taint_analysis::infrastructure::rule_chain::{
    FlowEdge, FlowState, KillFlags, RuleChain,
};
use crate::features::taint_analysis::ports::{EdgeSubmitter, FlowOutcome, InfoflowCfg};
use crate::shared::models::{Method, MethodId, Stmt, StmtId, StmtKind, Type, Value};

pub struct BackwardTaintProblem {
    manager: Arc<InfoflowManager>,
    chain: RuleChain,
}

impl BackwardTaintProblem {
    pub fn new(manager: Arc<InfoflowManager>) -> Self {
        let chain = RuleChain::backward(manager.clone());
        Self { manager, chain }
    }

    pub fn chain(&self) -> &RuleChain {
        &self.chain
    }

    /// Run the chain; `Err` carries an outcome that ends the flow function
    fn run_chain(
        &self,
        state: &FlowState<'_>,
        edge: FlowEdge<'_>,
        kill: &mut KillFlags,
    ) -> Result<FxHashSet<Abstraction>, FlowOutcome> {
        match self.chain.apply(state, edge, kill) {
            FlowOutcome::Redirect(edge) => Err(FlowOutcome::Redirect(edge)),
            FlowOutcome::Continue(_) if kill.kill_all => Err(FlowOutcome::none()),
            FlowOutcome::Continue(facts) => Ok(facts),
        }
    }

    fn tracks_control_flow(&self) -> bool {
        self.manager
            .config()
            .implicit_flow_mode
            .track_control_flow_dependencies()
    }

    fn tracks_statics(&self) -> bool {
        self.manager.config().static_field_tracking_mode.is_enabled()
    }

    /// Attach the dominator of `stmt` unless the edge leaves toward it
    fn enter_conditional(&self, abs: Abstraction, stmt: StmtId, dest: Option<StmtId>) -> Abstraction {
        if !self.tracks_control_flow() || abs.dominator().is_some() {
            return abs;
        }
        match self.manager.icfg().dominator_of(stmt) {
            Some(dom) if Some(dom) != dest => abs.with_dominator(Some(dom)),
            _ => abs,
        }
    }

    fn is_excluded(&self, callee: &Method) -> bool {
        self.manager
            .icfg()
            .program()
            .is_library_class(&callee.sig.class)
    }

    fn base_is(&self, val: &Value, ap: &AccessPath) -> bool {
        self.manager.aliasing().may_alias_base(val, ap)
    }

    /// Aliases of `val` for a fact derived at `stmt`
    fn aliases_of(
        &self,
        d1: &Abstraction,
        stmt: &Stmt,
        val: &Value,
        new_abs: &Abstraction,
    ) -> Vec<Abstraction> {
        let aliasing = self.manager.aliasing();
        if !aliasing.can_have_aliases_right_side(stmt, val, new_abs) {
            return vec![];
        }
        self.manager
            .icfg()
            .preds_of(stmt.id)
            .iter()
            .flat_map(|&pred| aliasing.compute_aliases(d1, pred, val, new_abs))
            .collect()
    }

    // ========================================================================
    // Normal flow
    // ========================================================================

    fn assign_flow(
        &self,
        d1: &Abstraction,
        source: &Abstraction,
        stmt: &Stmt,
        dest: StmtId,
        left: &Value,
        right: &Value,
        mut res: FxHashSet<Abstraction>,
    ) -> FlowOutcome {
        let config = self.manager.config();
        let aliasing = self.manager.aliasing();
        let factory = self.manager.access_path_factory();
        let type_utils = self.manager.type_utils();
        let ap = source.access_path();
        let source_base = ap.plain_value();

        let mut keep_source = false;
        for right_val in select_base_list(right, true) {
            // The left side reads the fact: its aliases hold it too
            let mut add_left = false;
            let mut cut_left = false;
            let mut create_new = false;
            let mut left_type: Option<Type> = None;

            match &right_val {
                Value::StaticField(_) => {
                    if self.tracks_statics() && aliasing.may_alias_access_path(ap, &right_val).is_some() {
                        add_left = true;
                        cut_left = true;
                    }
                }
                Value::InstanceField { base, field } => {
                    if base.ty == Type::Null {
                        return FlowOutcome::none();
                    }
                    if let Some(mapped) = aliasing.may_alias_access_path(ap, &right_val) {
                        add_left = true;
                        cut_left = mapped.field_count() > 0 && mapped.first_field_matches(field);
                    } else if self.base_is(&Value::Local(base.clone()), ap)
                        && ap.taint_sub_fields()
                        && ap.field_count() == 0
                    {
                        add_left = true;
                        create_new = true;
                    }
                }
                Value::ArrayRef { base, .. } => {
                    if !config.enable_array_tracking || ap.array_taint_type() == ArrayTaintType::Length {
                        continue;
                    }
                    if self.base_is(&Value::Local(base.clone()), ap) {
                        add_left = true;
                        left_type = base.ty.element_type().cloned();
                    }
                }
                _ => {}
            }

            if right_val.as_local().is_some() && right_val.as_local() == source_base {
                add_left = true;
                left_type = Some(ap.base_type().clone());
                match (left, right) {
                    (Value::ArrayRef { .. }, _) => {
                        left_type = Some(Type::array_of(ap.base_type().clone()));
                    }
                    (_, Value::InstanceOf { .. }) | (_, Value::NewArray { .. }) => create_new = true,
                    (_, Value::Length(_)) => {
                        if ap.array_taint_type() == ArrayTaintType::Contents {
                            add_left = false;
                        }
                        create_new = true;
                    }
                    _ => {
                        if !type_utils.check_cast(ap, &left.ty()) {
                            return FlowOutcome::none();
                        }
                    }
                }
            }

            if add_left {
                let new_ap = if create_new {
                    factory.create_access_path(left, true)
                } else {
                    factory.copy_with_new_value(ap, left, left_type, cut_left)
                };
                if let Some(new_ap) = new_ap {
                    let new_abs = source.derive_new_abstraction(new_ap, Some(stmt.id));
                    res.extend(self.aliases_of(d1, stmt, left, &new_abs));
                }
            }

            // The left side is the fact: it came from the right side
            let mut add_right = false;
            let mut cut_first = false;
            let mut right_type: Option<Type> = None;

            match left {
                Value::StaticField(_) => {
                    if self.tracks_statics() && aliasing.may_alias_access_path(ap, left).is_some() {
                        add_right = true;
                        cut_first = true;
                        right_type = ap.first_field_type().cloned();
                    }
                }
                Value::InstanceField { base, field } => {
                    if base.ty == Type::Null {
                        return FlowOutcome::none();
                    }
                    if let Some(mapped) = aliasing.may_alias_access_path(ap, left) {
                        add_right = true;
                        cut_first = mapped.field_count() > 0 && mapped.first_field_matches(field);
                        right_type = mapped.first_field_type().cloned();
                    } else if self.base_is(&Value::Local(base.clone()), ap)
                        && ap.taint_sub_fields()
                        && ap.field_count() == 0
                    {
                        // The whole object is tainted; other fields keep it
                        add_right = true;
                        right_type = Some(field.ty.clone());
                        keep_source = true;
                    }
                }
                Value::ArrayRef { base, .. } => {
                    if !config.enable_array_tracking || ap.array_taint_type() == ArrayTaintType::Length {
                        continue;
                    }
                    if self.base_is(&Value::Local(base.clone()), ap) {
                        // Weak update: other elements stay tainted
                        add_right = true;
                        right_type = base.ty.element_type().cloned();
                        keep_source = true;
                    }
                }
                _ => {
                    if self.base_is(left, ap) {
                        match right {
                            Value::InstanceOf { .. } => right_type = Some(right_val.ty()),
                            Value::Cast { ty, .. } => {
                                if !type_utils.check_cast_types(ty, &right_val.ty()) {
                                    return FlowOutcome::none();
                                }
                            }
                            _ => {}
                        }
                        add_right = match right {
                            Value::InstanceOf { .. } => config.enable_instance_of_tainting,
                            Value::Length(_) | Value::ArrayRef { .. } => false,
                            _ => true,
                        };
                    }
                }
            }

            if !add_right {
                continue;
            }
            if !keep_source {
                res.remove(source);
            }
            if source.dominator().is_some() {
                res.insert(source.derive_conditional_update(stmt.id));
            }
            if right_val.is_constant() || matches!(right, Value::New(_) | Value::NewArray { .. }) {
                continue;
            }
            let Some(new_ap) = factory.copy_with_new_value(ap, &right_val, right_type, cut_first) else {
                continue;
            };
            let mut new_abs = source.derive_new_abstraction(new_ap, Some(stmt.id));
            new_abs = self.enter_conditional(new_abs, stmt.id, Some(dest));

            let immutable_field = left.is_field_ref()
                && (left.ty().is_primitive() || left.ty().is_string())
                && !ap.can_have_immutable_aliases();
            if ap.is_primitive_or_string_base() || immutable_field {
                new_abs = new_abs.derive_new_abstraction_with_turn_unit(Some(stmt.id));
            } else {
                res.extend(self.aliases_of(d1, stmt, &right_val, &new_abs));
            }
            res.insert(new_abs);
        }
        FlowOutcome::Continue(res)
    }

    // ========================================================================
    // Call flow
    // ========================================================================

    fn map_into_callee(
        &self,
        source: &Abstraction,
        stmt: &Stmt,
        callee: &Method,
        res: &mut FxHashSet<Abstraction>,
    ) {
        let icfg = self.manager.icfg();
        let aliasing = self.manager.aliasing();
        let factory = self.manager.access_path_factory();
        let type_utils = self.manager.type_utils();
        let ap = source.access_path();

        // Result value -> returned values
        if let StmtKind::Assign { left, .. } = &stmt.kind {
            if source.dominator().is_none() && self.base_is(left, ap) {
                for &exit in callee.stmts() {
                    let StmtKind::Return(Some(ret_val @ Value::Local(_))) = &icfg.stmt(exit).kind else {
                        continue;
                    };
                    if !type_utils.check_cast_types(ap.base_type(), &ret_val.ty()) {
                        continue;
                    }
                    let Some(new_ap) = factory.copy_with_new_value(ap, ret_val, Some(ret_val.ty()), false) else {
                        continue;
                    };
                    let mut abs = source.derive_new_abstraction(new_ap, Some(stmt.id));
                    if ap.is_primitive_or_string_base() {
                        abs = abs.derive_new_abstraction_with_turn_unit(Some(stmt.id));
                    }
                    if self.tracks_control_flow() {
                        let branches = icfg.conditional_branches_intraprocedural(exit);
                        if !branches.is_empty() {
                            res.extend(branches.into_iter().map(|b| abs.clone().with_dominator(Some(b))));
                            continue;
                        }
                    }
                    res.insert(abs);
                }
            }
        }

        if ap.is_static_field_ref() {
            if self.tracks_statics() {
                res.insert(source.derive_new_abstraction(ap.clone(), Some(stmt.id)));
            }
            return;
        }

        let Some(inv) = stmt.invoke_expr() else {
            return;
        };

        // Receiver -> this
        if let (Some(base), Some(this), false) = (&inv.base, callee.this_local(), callee.is_static) {
            let aliased_by_arg = inv.args.iter().any(|arg| self.base_is(arg, ap));
            if self.base_is(&Value::Local(base.clone()), ap)
                && !aliased_by_arg
                && type_utils.has_compatible_types_for_call(ap, &callee.sig.class)
            {
                if let Some(new_ap) = factory.copy_with_new_value(ap, &Value::Local(this.clone()), None, false) {
                    res.insert(source.derive_new_abstraction(new_ap, Some(stmt.id)));
                }
            }
        }

        // Arguments -> parameters; only heap objects can change in the callee
        if ap.is_primitive_or_string_base() || !ap.taint_sub_fields() {
            return;
        }
        for (i, arg) in inv.args.iter().enumerate() {
            if !aliasing.may_alias_base(arg, ap) {
                continue;
            }
            let Some(param) = callee.parameter_local(i) else {
                continue;
            };
            if icfg.method_writes_value(callee.id, param) {
                continue;
            }
            if let Some(new_ap) = factory.copy_with_new_value(ap, &Value::Local(param.clone()), None, false) {
                res.insert(source.derive_new_abstraction(new_ap, Some(stmt.id)));
            }
        }
    }

    // ========================================================================
    // Return flow
    // ========================================================================

    fn map_into_caller(
        &self,
        source: &Abstraction,
        callee: &Method,
        exit: &Stmt,
        call_site: &Stmt,
        return_site: Option<StmtId>,
        caller_d1s: &[Abstraction],
        res: &mut FxHashSet<Abstraction>,
    ) {
        let icfg = self.manager.icfg();
        let factory = self.manager.access_path_factory();
        let type_utils = self.manager.type_utils();
        let ap = source.access_path();
        let Some(inv) = call_site.invoke_expr() else {
            return;
        };
        let derive = |val: &Value| {
            factory
                .copy_with_new_value(ap, val, None, false)
                .map(|new_ap| source.derive_new_abstraction(new_ap, Some(exit.id)))
        };

        // this -> receiver
        if let (Some(this), Some(base)) = (callee.this_local(), &inv.base) {
            if self.base_is(&Value::Local(this.clone()), ap) {
                if let Some(abs) = derive(&Value::Local(base.clone())) {
                    res.insert(self.enter_conditional(abs, call_site.id, return_site));
                }
            }
        }

        // parameters -> arguments
        let returns_param = |param: &Value| {
            callee.stmts().iter().any(|&s| {
                matches!(&icfg.stmt(s).kind, StmtKind::Return(Some(v)) if v == param)
            })
        };
        for (i, arg) in inv.args.iter().enumerate() {
            let Some(param) = callee.parameter_local(i) else {
                continue;
            };
            let param = Value::Local(param.clone());
            if !self.base_is(&param, ap) {
                continue;
            }
            if !AccessPath::can_contain_value(arg) || !type_utils.check_cast(ap, &arg.ty()) {
                continue;
            }
            let Some(abs) = derive(arg) else {
                continue;
            };
            let abs = self.enter_conditional(abs, call_site.id, return_site);

            let duplicated = inv.args.iter().filter(|a| *a == arg).count() > 1;
            if duplicated || returns_param(&param) {
                for caller_d1 in caller_d1s {
                    res.extend(self.aliases_of(caller_d1, call_site, arg, &abs));
                }
            }
            res.insert(abs);
        }
    }
}

impl IFDSProblem for BackwardTaintProblem {
    fn icfg(&self) -> &dyn InfoflowCfg {
        self.manager.icfg()
    }

    /// Every sink call in a method with a body, with the zero fact
    fn initial_seeds(&self) -> Vec<(StmtId, Abstraction)> {
        let Some(ssm) = self.manager.source_sink_manager() else {
            return vec![];
        };
        let program = self.manager.icfg().program();
        let mut seeds = vec![];
        for method in program.methods().filter(|m| m.has_body()) {
            for &s in method.stmts() {
                if ssm.is_sink_stmt(program.stmt(s)) {
                    seeds.push((s, self.zero_value()));
                }
            }
        }
        tracing::debug!(seeds = seeds.len(), "sink seeds collected");
        seeds
    }

    fn normal_flow(
        &self,
        d1: &Abstraction,
        source: &Abstraction,
        stmt: StmtId,
        dest: StmtId,
        submitter: &dyn EdgeSubmitter,
    ) -> FlowOutcome {
        let icfg = self.manager.icfg();
        let (stmt, dest_stmt) = (icfg.stmt(stmt), icfg.stmt(dest));
        let state = FlowState {
            d1,
            source,
            stmt,
            submitter,
        };
        let mut kill = KillFlags::default();
        let res = match self.run_chain(&state, FlowEdge::Normal { dest: dest_stmt }, &mut kill) {
            Ok(res) => res,
            Err(done) => return done,
        };

        if source.is_zero() || source.access_path().is_empty() {
            return FlowOutcome::Continue(res);
        }
        match &stmt.kind {
            StmtKind::Assign { left, right } => {
                self.assign_flow(d1, source, stmt, dest, left, right, res)
            }
            _ => FlowOutcome::Continue(res),
        }
    }

    fn call_flow(
        &self,
        d1: &Abstraction,
        source: &Abstraction,
        call: StmtId,
        callee: MethodId,
        submitter: &dyn EdgeSubmitter,
    ) -> FlowOutcome {
        if source.is_zero() {
            return FlowOutcome::none();
        }
        let icfg = self.manager.icfg();
        let stmt = icfg.stmt(call);
        let callee = icfg.program().method(callee);
        if !callee.has_body() || self.is_excluded(callee) {
            return FlowOutcome::none();
        }
        if !self.tracks_statics() && callee.sig.is_static_initializer() {
            return FlowOutcome::none();
        }
        let ap = source.access_path();
        if self.tracks_statics() && ap.is_static_field_ref() {
            if let Some(field) = ap.first_field() {
                if !icfg.is_static_field_used(callee.id, field) {
                    return FlowOutcome::none();
                }
            }
        }

        let state = FlowState {
            d1,
            source,
            stmt,
            submitter,
        };
        let mut kill = KillFlags::default();
        let mut res = match self.run_chain(&state, FlowEdge::Call { callee }, &mut kill) {
            Ok(res) => res,
            Err(done) => return done,
        };
        if ap.is_empty() {
            return FlowOutcome::Continue(res);
        }
        self.map_into_callee(source, stmt, callee, &mut res);
        FlowOutcome::Continue(res)
    }

    fn return_flow(
        &self,
        callee_d1: &Abstraction,
        source: &Abstraction,
        call_site: StmtId,
        callee: MethodId,
        exit: StmtId,
        return_site: Option<StmtId>,
        caller_d1s: &[Abstraction],
        submitter: &dyn EdgeSubmitter,
    ) -> FlowOutcome {
        if source.is_zero() {
            return FlowOutcome::none();
        }
        let icfg = self.manager.icfg();
        let (exit_stmt, call_stmt) = (icfg.stmt(exit), icfg.stmt(call_site));
        let callee = icfg.program().method(callee);
        let state = FlowState {
            d1: callee_d1,
            source,
            stmt: exit_stmt,
            submitter,
        };
        let edge = FlowEdge::Return {
            caller_d1s,
            return_site: return_site.map(|r| icfg.stmt(r)),
            call_site: call_stmt,
        };
        let mut kill = KillFlags::default();
        let mut res = match self.run_chain(&state, edge, &mut kill) {
            Ok(res) => res,
            Err(done) => return done,
        };

        let ap = source.access_path();
        if ap.is_empty() {
            return FlowOutcome::Continue(res);
        }
        if ap.is_static_field_ref() {
            if self.tracks_statics() {
                res.insert(source.derive_new_abstraction(ap.clone(), Some(exit)));
            }
        } else {
            self.map_into_caller(source, callee, exit_stmt, call_stmt, return_site, caller_d1s, &mut res);
        }

        let res = res
            .into_iter()
            .map(|abs| abs.with_corresponding_call_site(Some(call_site)))
            .collect::<FxHashSet<_>>();
        FlowOutcome::Continue(res)
    }

    fn call_to_return_flow(
        &self,
        d1: &Abstraction,
        source: &Abstraction,
        call: StmtId,
        return_site: StmtId,
        submitter: &dyn EdgeSubmitter,
    ) -> FlowOutcome {
        let icfg = self.manager.icfg();
        let stmt = icfg.stmt(call);
        let state = FlowState {
            d1,
            source,
            stmt,
            submitter,
        };
        let mut kill = KillFlags::default();
        let mut res = match self.run_chain(&state, FlowEdge::CallToReturn, &mut kill) {
            Ok(res) => res,
            Err(done) => return done,
        };
        if source.is_zero() {
            return FlowOutcome::Continue(self.with_call_dominator(res, source, call, return_site));
        }

        let ap = source.access_path();
        let pass_through = !kill.kill_source;
        let program = icfg.program();
        let callees: Vec<&Method> = icfg
            .callees_of_call_at(call)
            .iter()
            .map(|&m| program.method(m))
            .collect();

        // The result is overwritten by the call
        if let StmtKind::Assign { left, .. } = &stmt.kind {
            if self.base_is(left, ap) {
                return FlowOutcome::Continue(res);
            }
        }

        let opaque = !callees.iter().any(|m| m.has_body() && !self.is_excluded(m));
        let unchecked_sink = !self.manager.config().inspect_sinks
            && self
                .manager
                .source_sink_manager()
                .map(|ssm| ssm.is_sink_stmt(stmt))
                .unwrap_or(false);
        if opaque || unchecked_sink {
            if pass_through {
                res.insert(source.clone());
            }
            return FlowOutcome::Continue(self.with_call_dominator(res, source, call, return_site));
        }

        // Facts a callee may change travel through the callee instead
        if ap.is_static_field_ref() {
            let used = ap
                .first_field()
                .map(|f| callees.iter().any(|m| icfg.is_static_field_used(m.id, f)))
                .unwrap_or(false);
            if self.tracks_statics() && used {
                return FlowOutcome::Continue(res);
            }
        } else if let Some(inv) = stmt.invoke_expr() {
            if let Some(base) = &inv.base {
                let callee_native = callees.iter().all(|m| m.is_native);
                if self.base_is(&Value::Local(base.clone()), ap)
                    && (ap.taint_sub_fields() || ap.field_count() > 0)
                    && !callee_native
                {
                    return FlowOutcome::Continue(res);
                }
            }
            if !ap.is_primitive_or_string_base()
                && inv.args.iter().any(|arg| self.base_is(arg, ap))
            {
                return FlowOutcome::Continue(res);
            }
        }

        if pass_through {
            res.insert(source.clone());
        }
        FlowOutcome::Continue(self.with_call_dominator(res, source, call, return_site))
    }
}

impl BackwardTaintProblem {
    /// Facts leaving a call inside a branch remember the branch
    fn with_call_dominator(
        &self,
        res: FxHashSet<Abstraction>,
        source: &Abstraction,
        call: StmtId,
        return_site: StmtId,
    ) -> FxHashSet<Abstraction> {
        if !self.tracks_control_flow() || source.dominator().is_some() {
            return res;
        }
        match self.manager.icfg().dominator_of(call) {
            Some(dom) if dom != return_site => res
                .into_iter()
                .map(|abs| {
                    if abs.is_zero() {
                        abs
                    } else {
                        abs.derive_new_abstraction_with_dominator(dom, None)
                    }
                })
                .collect(),
            _ => res,
        }
    }
}

impl std::fmt::Debug for BackwardTaintProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackwardTaintProblem")
            .field("chain", &self.chain)
            .finish()
    }
}
