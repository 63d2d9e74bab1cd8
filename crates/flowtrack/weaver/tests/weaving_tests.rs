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

use flowtrack_core::{ClassConstant, ConstantRegistry};
use flowtrack_weaver::analysis::{FlowAnalyzer, FlowValue, MergeSlot};
use flowtrack_weaver::instrument::required_stack;
use flowtrack_weaver::ir::{Class, Cond, Constant, Hook, Insn, InvokeKind, Method, MethodDesc, MethodRef, Type};
use flowtrack_weaver::{SolverOrder, Weaver, WeaverConfig};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

fn weaver(break_interning: bool) -> (Weaver, Arc<ConstantRegistry>) {
    let registry = Arc::new(ConstantRegistry::new());
    let mut config = WeaverConfig::default();
    if !break_interning {
        config = config.with_break_string_interning("");
    }
    let weaver = Weaver::new(config).unwrap().with_registry(registry.clone());
    (weaver, registry)
}

fn weave_one(method: Method) -> (Method, Arc<ConstantRegistry>) {
    let (weaver, registry) = weaver(false);
    let class = Class::new(method.owner.clone()).with_method(method);
    let (woven, report) = weaver.weave_class(&class);
    assert!(report.failed.is_empty(), "{:?}", report.failed);
    (woven.methods[0].clone(), registry)
}

fn call(kind: InvokeKind, owner: &str, name: &str, desc: &str) -> Insn {
    Insn::Invoke(MethodRef::new(kind, owner, name, MethodDesc::parse(desc).unwrap()))
}

fn constant_in(registry: &ConstantRegistry, class_id: u32, text: &str) -> ClassConstant {
    let content = registry.get(class_id).unwrap().content();
    let offset = content.find(&format!("  {text}\n")).unwrap() + 2;
    ClassConstant { class_id, offset, length: text.len() }
}

#[test]
fn test_array_copy_tracks_element() {
    // dst[0] = src[1]
    let method = Method::new("demo/Copy", "copy", "([C[C)V", true).unwrap().with_insns(vec![
        Insn::Load(1),
        Insn::Const(Constant::Int(0)),
        Insn::Load(0),
        Insn::Const(Constant::Int(1)),
        Insn::ArrayLoad(Type::Char),
        Insn::ArrayStore(Type::Char),
        Insn::Return(Type::Void),
    ]);
    let (woven, _) = weave_one(method);
    assert_eq!(
        woven.insns,
        vec![
            Insn::Const(Constant::Null),
            Insn::Store(2),
            Insn::Load(1),
            Insn::Const(Constant::Int(0)),
            Insn::Load(0),
            Insn::Const(Constant::Int(1)),
            Insn::Dup2,
            Insn::Hook(Hook::ElementPoint),
            Insn::Store(2),
            Insn::ArrayLoad(Type::Char),
            Insn::Load(2),
            Insn::Hook(Hook::ArrayStoreWithPoint(Type::Char)),
            Insn::Return(Type::Void),
        ]
    );
    assert_eq!(woven.max_locals, 3);
    assert_eq!(woven.max_stack, 6);
    assert_eq!(required_stack(&woven), Ok(6));
}

#[test]
fn test_merged_constants_are_stashed_per_branch() {
    // out[0] = flag ? 'A' : 'B'
    let method = Method::new("demo/Pick", "pick", "(Z[C)V", true).unwrap().with_insns(vec![
        Insn::Load(1),
        Insn::Const(Constant::Int(0)),
        Insn::Load(0),
        Insn::If { cond: Cond::Eq, target: 1 },
        Insn::Const(Constant::Int('A' as i32)),
        Insn::Goto(2),
        Insn::Label(1),
        Insn::Const(Constant::Int('B' as i32)),
        Insn::Label(2),
        Insn::ArrayStore(Type::Char),
        Insn::Return(Type::Void),
    ]);
    let (woven, registry) = weave_one(method);
    let content = registry.get(0).unwrap().content();
    assert!(content.starts_with("class demo.Pick\nvoid pick(boolean, char[]):\n"));
    assert_eq!(content.lines().count(), 4);
    let a = constant_in(&registry, 0, "A");
    let b = constant_in(&registry, 0, "B");
    assert_eq!(
        woven.insns,
        vec![
            Insn::Const(Constant::Null),
            Insn::Store(2),
            Insn::Load(1),
            Insn::Const(Constant::Int(0)),
            Insn::Load(0),
            Insn::If { cond: Cond::Eq, target: 1 },
            Insn::Const(Constant::Int('A' as i32)),
            Insn::Hook(Hook::ConstantPoint(a)),
            Insn::Store(2),
            Insn::Goto(2),
            Insn::Label(1),
            Insn::Const(Constant::Int('B' as i32)),
            Insn::Hook(Hook::ConstantPoint(b)),
            Insn::Store(2),
            Insn::Label(2),
            Insn::Load(2),
            Insn::Hook(Hook::ArrayStoreWithPoint(Type::Char)),
            Insn::Return(Type::Void),
        ]
    );
    assert_eq!(woven.max_stack, 4);
}

#[test]
fn test_call_return_feeds_call_argument() {
    // Out.write(In.read())
    let method = Method::new("demo/Pump", "pump", "()V", true).unwrap().with_insns(vec![
        call(InvokeKind::Static, "demo/In", "read", "()C"),
        call(InvokeKind::Static, "demo/Out", "write", "(C)V"),
        Insn::Return(Type::Void),
    ]);
    let (woven, _) = weave_one(method);
    assert_eq!(
        woven.insns,
        vec![
            Insn::Const(Constant::Null),
            Insn::Store(0),
            Insn::Hook(Hook::InvocationCreate("read ()C".into())),
            Insn::Hook(Hook::InvocationCalling),
            Insn::Store(0),
            call(InvokeKind::Static, "demo/In", "read", "()C"),
            Insn::Hook(Hook::InvocationCreate("write (C)V".into())),
            Insn::Load(0),
            Insn::Hook(Hook::InvocationReturnPoint),
            Insn::Hook(Hook::InvocationSetArg(0)),
            Insn::Hook(Hook::InvocationCalling),
            Insn::Pop,
            call(InvokeKind::Static, "demo/Out", "write", "(C)V"),
            Insn::Return(Type::Void),
        ]
    );
    assert_eq!(woven.max_stack, 3);
    assert_eq!(required_stack(&woven), Ok(3));
}

#[test]
fn test_callee_side_return_and_argument() {
    let first = Method::new("demo/Src", "first", "([C)C", true).unwrap().with_insns(vec![
        Insn::Load(0),
        Insn::Const(Constant::Int(0)),
        Insn::ArrayLoad(Type::Char),
        Insn::Return(Type::Char),
    ]);
    let (woven, _) = weave_one(first);
    assert_eq!(
        woven.insns,
        vec![
            Insn::Const(Constant::Null),
            Insn::Store(1),
            Insn::Hook(Hook::InvocationStart("first ([C)C".into())),
            Insn::Store(2),
            Insn::Load(0),
            Insn::Const(Constant::Int(0)),
            Insn::Dup2,
            Insn::Hook(Hook::ElementPoint),
            Insn::Store(1),
            Insn::ArrayLoad(Type::Char),
            Insn::Load(2),
            Insn::Load(1),
            Insn::Hook(Hook::InvocationReturning),
            Insn::Return(Type::Char),
        ]
    );

    let put = Method::new("demo/Dst", "put", "([CC)V", true).unwrap().with_insns(vec![
        Insn::Load(0),
        Insn::Const(Constant::Int(0)),
        Insn::Load(1),
        Insn::ArrayStore(Type::Char),
        Insn::Return(Type::Void),
    ]);
    let (woven, _) = weave_one(put);
    assert_eq!(
        woven.insns,
        vec![
            Insn::Hook(Hook::InvocationStart("put ([CC)V".into())),
            Insn::Store(2),
            Insn::Load(0),
            Insn::Const(Constant::Int(0)),
            Insn::Load(1),
            Insn::Load(2),
            Insn::Hook(Hook::InvocationArgPoint(1)),
            Insn::Hook(Hook::ArrayStoreWithPoint(Type::Char)),
            Insn::Return(Type::Void),
        ]
    );
    assert_eq!(woven.max_locals, 3);
    assert!(required_stack(&woven).unwrap() <= usize::from(woven.max_stack));
}

#[test]
fn test_string_comparison_and_literals() {
    let method = Method::new("demo/Cmp", "isX", "(Ljava/lang/String;)Z", true).unwrap().with_insns(vec![
        Insn::Load(0),
        Insn::Const(Constant::Str("x".into())),
        Insn::IfRefNe(1),
        Insn::Const(Constant::Int(1)),
        Insn::Return(Type::Boolean),
        Insn::Label(1),
        Insn::Const(Constant::Int(0)),
        Insn::Return(Type::Boolean),
    ]);

    let (woven, _) = weave_one(method.clone());
    assert_eq!(woven.insns[2], Insn::Hook(Hook::StringEquals));
    assert_eq!(woven.insns[3], Insn::If { cond: Cond::Eq, target: 1 });
    assert_eq!(woven.insns.len(), method.insns.len() + 1);

    let (weaver, registry) = weaver(true);
    let (class, report) = weaver.weave_class(&Class::new("demo/Cmp").with_method(method));
    let woven = &class.methods[0];
    let table = registry.get(report.constant_table.unwrap()).unwrap();
    let offset = table.content().find("  x\n").unwrap() + 2;
    assert_eq!(woven.insns[2], Insn::Hook(Hook::ConstantString { class_id: table.class_id(), offset }));
    assert_eq!(report.sites.get("string_literal"), Some(&1));
    assert_eq!(report.sites.get("string_comparison"), Some(&1));
}

#[test]
fn test_concat_marks_tracked_chars() {
    // "" + s + src[0]
    let method = Method::new("demo/Cat", "cat", "(Ljava/lang/String;[C)Ljava/lang/String;", true)
        .unwrap()
        .with_insns(vec![
            Insn::Load(0),
            Insn::Load(1),
            Insn::Const(Constant::Int(0)),
            Insn::ArrayLoad(Type::Char),
            Insn::Concat(vec![Type::string(), Type::Char]),
            Insn::Return(Type::string()),
        ]);
    let (woven, _) = weave_one(method);
    let hook = woven.insns.iter().find_map(|insn| match insn {
        Insn::Hook(hook @ Hook::ConcatWithPoints { .. }) => Some(hook.clone()),
        _ => None,
    });
    assert_eq!(hook, Some(Hook::ConcatWithPoints { args: vec![Type::string(), Type::Char], mask: ".T".into() }));
    assert!(required_stack(&woven).unwrap() <= usize::from(woven.max_stack));
}

#[test]
fn test_broken_method_is_left_alone() {
    let broken = Method::new("demo/Mixed", "broken", "([C)V", true)
        .unwrap()
        .with_insns(vec![Insn::Load(0), Insn::Pop]);
    let good = Method::new("demo/Mixed", "good", "([C[C)V", true).unwrap().with_insns(vec![
        Insn::Load(1),
        Insn::Const(Constant::Int(0)),
        Insn::Load(0),
        Insn::Const(Constant::Int(0)),
        Insn::ArrayLoad(Type::Char),
        Insn::ArrayStore(Type::Char),
        Insn::Return(Type::Void),
    ]);
    let idle = Method::new("demo/Mixed", "idle", "()V", true).unwrap().with_insns(vec![Insn::Return(Type::Void)]);
    let class = Class::new("demo/Mixed").with_method(broken.clone()).with_method(good.clone()).with_method(idle);

    let (weaver, _) = weaver(false);
    let (woven, report) = weaver.weave_class(&class);
    assert_eq!(woven.methods[0], broken);
    assert_ne!(woven.methods[1], good);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].method, "broken ([C)V");
    assert_eq!(report.instrumented, vec!["good ([C[C)V".to_string()]);
    assert_eq!(report.unchanged, vec!["idle ()V".to_string()]);
}

#[test]
fn test_filtered_class_is_untouched() {
    let registry = Arc::new(ConstantRegistry::new());
    let weaver = Weaver::new(WeaverConfig::default().with_filter("+demo.*"))
        .unwrap()
        .with_registry(registry.clone());
    let method = Method::new("other/Thing", "f", "([C)C", true).unwrap().with_insns(vec![
        Insn::Load(0),
        Insn::Const(Constant::Int(0)),
        Insn::ArrayLoad(Type::Char),
        Insn::Return(Type::Char),
    ]);
    let class = Class::new("other/Thing").with_method(method);
    let (woven, report) = weaver.weave_class(&class);
    assert_eq!(woven, class);
    assert!(!report.included);
    assert!(registry.is_empty());
}

fn copy_loop() -> Method {
    // c = 'x'; for (i = 0; i < 3; i++) c = src[i]; out[0] = c
    Method::new("demo/Loop", "last", "([C[C)V", true).unwrap().with_insns(vec![
        Insn::Const(Constant::Int('x' as i32)),
        Insn::Store(3),
        Insn::Const(Constant::Int(0)),
        Insn::Store(2),
        Insn::Label(0),
        Insn::Load(2),
        Insn::Const(Constant::Int(3)),
        Insn::IfCmp { cond: Cond::Ge, target: 1 },
        Insn::Load(0),
        Insn::Load(2),
        Insn::ArrayLoad(Type::Char),
        Insn::Store(3),
        Insn::Load(2),
        Insn::Const(Constant::Int(1)),
        Insn::Binary { op: flowtrack_weaver::ir::BinaryOp::Add, ty: Type::Int },
        Insn::Store(2),
        Insn::Goto(0),
        Insn::Label(1),
        Insn::Load(1),
        Insn::Const(Constant::Int(0)),
        Insn::Load(3),
        Insn::ArrayStore(Type::Char),
        Insn::Return(Type::Void),
    ])
}

type Classification = Vec<Option<Vec<(bool, Option<HashSet<FlowValue>>)>>>;

fn classify(method: &Method, order: SolverOrder) -> Classification {
    let analysis = FlowAnalyzer::new().with_order(order).analyze(method).unwrap();
    let mut memo: HashMap<MergeSlot, bool> = HashMap::new();
    analysis
        .frames
        .iter()
        .map(|frame| {
            frame.as_ref().map(|frame| {
                frame
                    .locals()
                    .iter()
                    .chain(frame.stack())
                    .map(|value| {
                        let members = match value.unwrap_copies() {
                            FlowValue::Merged { slot, .. } => {
                                Some(analysis.merges.members(slot).iter().cloned().collect())
                            }
                            _ => None,
                        };
                        (analysis.is_trackable(value, &mut memo), members)
                    })
                    .collect()
            })
        })
        .collect()
}

#[test]
fn test_solver_order_does_not_change_classification() {
    let method = copy_loop();
    assert_eq!(classify(&method, SolverOrder::Fifo), classify(&method, SolverOrder::Lifo));

    let analysis = FlowAnalyzer::new().analyze(&method).unwrap();
    let stored = analysis.frame(21).unwrap().peek(0).unwrap().clone();
    assert!(analysis.is_trackable(&stored, &mut HashMap::new()));
}

#[test]
fn test_loop_is_woven_with_merge_local() {
    let (woven, _) = weave_one(copy_loop());
    // local 4 holds the merged point, local 5 the element point
    let stashes = woven.insns.iter().filter(|insn| **insn == Insn::Store(4)).count();
    // initialized in the prologue, then one stash per definition
    assert_eq!(stashes, 3);
    assert!(required_stack(&woven).unwrap() <= usize::from(woven.max_stack));
}

#[test]
fn test_self_feeding_loop_is_untrackable() {
    // c = 'x'; do { c = c; } while (n != 0); out[0] = c
    let method = Method::new("demo/Spin", "spin", "([CI)V", true).unwrap().with_insns(vec![
        Insn::Const(Constant::Int('x' as i32)),
        Insn::Store(2),
        Insn::Label(0),
        Insn::Load(2),
        Insn::Store(2),
        Insn::Load(1),
        Insn::If { cond: Cond::Ne, target: 0 },
        Insn::Load(0),
        Insn::Const(Constant::Int(0)),
        Insn::Load(2),
        Insn::ArrayStore(Type::Char),
        Insn::Return(Type::Void),
    ]);
    let analysis = FlowAnalyzer::new().analyze(&method).unwrap();
    let stored = analysis.frame(10).unwrap().peek(0).unwrap().clone();
    assert!(!analysis.is_trackable(&stored, &mut HashMap::new()));

    let (woven, registry) = weave_one(method);
    assert!(registry.is_empty());
    let store = woven.insns.iter().position(|insn| matches!(insn, Insn::Hook(Hook::ArrayStoreWithPoint(_)))).unwrap();
    assert_eq!(woven.insns[store - 1], Insn::Const(Constant::Null));
}

const ARRAYCOPY: &str = "(Ljava/lang/Object;ILjava/lang/Object;II)V";

#[test]
fn test_bulk_array_calls_become_hooks() {
    // System.arraycopy(src, 1, dst, 0, 2); return src.clone()
    let method = Method::new("demo/Bulk", "copy", "([C[C)Ljava/lang/Object;", true).unwrap().with_insns(vec![
        Insn::Load(0),
        Insn::Const(Constant::Int(1)),
        Insn::Load(1),
        Insn::Const(Constant::Int(0)),
        Insn::Const(Constant::Int(2)),
        call(InvokeKind::Static, "java/lang/System", "arraycopy", ARRAYCOPY),
        Insn::Load(0),
        call(InvokeKind::Virtual, "[C", "clone", "()Ljava/lang/Object;"),
        Insn::Return(Type::Object("java/lang/Object".into())),
    ]);
    let (weaver, _) = weaver(false);
    let (class, report) = weaver.weave_class(&Class::new("demo/Bulk").with_method(method.clone()));
    let woven = &class.methods[0];
    assert_eq!(woven.insns.len(), method.insns.len());
    assert_eq!(woven.insns[5], Insn::Hook(Hook::ArrayCopy));
    assert_eq!(woven.insns[7], Insn::Hook(Hook::ArrayClone));
    assert_eq!(report.sites.get("array_copy"), Some(&1));
    assert_eq!(report.sites.get("array_clone"), Some(&1));
    assert_eq!(required_stack(woven), Ok(5));
}

#[test]
fn test_int_array_copy_stays_a_call() {
    let method = Method::new("demo/Bulk", "copyInts", "([I[I)V", true).unwrap().with_insns(vec![
        Insn::Load(0),
        Insn::Const(Constant::Int(0)),
        Insn::Load(1),
        Insn::Const(Constant::Int(0)),
        Insn::Const(Constant::Int(4)),
        call(InvokeKind::Static, "java/lang/System", "arraycopy", ARRAYCOPY),
        Insn::Return(Type::Void),
    ]);
    let (woven, registry) = weave_one(method.clone());
    assert_eq!(woven.insns, method.insns);
    assert!(registry.is_empty());
}

#[test]
fn test_core_library_comparisons_keep_identity() {
    let method = Method::new("java/lang/Names", "isX", "(Ljava/lang/String;)Z", true).unwrap().with_insns(vec![
        Insn::Load(0),
        Insn::Const(Constant::Str("x".into())),
        Insn::IfRefNe(1),
        Insn::Const(Constant::Int(1)),
        Insn::Return(Type::Boolean),
        Insn::Label(1),
        Insn::Const(Constant::Int(0)),
        Insn::Return(Type::Boolean),
    ]);
    let (woven, _) = weave_one(method.clone());
    assert_eq!(woven.insns, method.insns);
}

#[test]
fn test_pass_through_call_gets_no_call_record() {
    // return Byte.toUnsignedInt(b)
    let method = Method::new("demo/Bytes", "widen", "(B)I", true).unwrap().with_insns(vec![
        Insn::Load(0),
        call(InvokeKind::Static, "java/lang/Byte", "toUnsignedInt", "(B)I"),
        Insn::Return(Type::Int),
    ]);
    let (woven, _) = weave_one(method.clone());
    assert!(!woven.insns.iter().any(|insn| matches!(insn, Insn::Hook(Hook::InvocationCreate(_)))));
    assert_eq!(woven.insns, method.insns);
}
