//! Shared pieces of the operator-lowering drivers: lambda-argument access,
//! the identity-selector check, and substitution of the current output
//! shape into a lambda body.
//!
//! Both backends walk the same operator-call chain; the backend modules
//! supply the per-operator effects on their query representations.

use crate::error::CompileError;
use crate::expr::{CallExpr, Expr, LambdaExpr, NewExpr};

/// the body of the lambda at `index` among the call's arguments.
pub fn lambda_body(call: &CallExpr, index: usize) -> Result<&Expr, CompileError> {
    match call.args.get(index) {
        Some(Expr::Lambda(LambdaExpr { body })) => Ok(body),
        _ => Err(CompileError::InvalidTranslation(format!(
            "operator {} expects a lambda argument at position {}",
            call.op, index
        ))),
    }
}

/// true when a selector body is exactly the lambda parameter.
pub fn is_identity(body: &Expr) -> bool {
    matches!(body, Expr::Var)
}

/// replaces every reference to the lambda parameter with the current
/// output-shape template, producing a new tree.
pub fn substitute(body: &Expr, replacement: &Expr) -> Expr {
    match body {
        Expr::Var => replacement.clone(),
        Expr::Member { object, member } => Expr::Member {
            object: Box::new(substitute(object, replacement)),
            member: member.clone(),
        },
        Expr::Binary { op, left, right } => Expr::Binary {
            op: *op,
            left: Box::new(substitute(left, replacement)),
            right: Box::new(substitute(right, replacement)),
        },
        Expr::Unary { op, operand } => Expr::Unary {
            op: *op,
            operand: Box::new(substitute(operand, replacement)),
        },
        Expr::New(n) => Expr::New(NewExpr {
            type_name: n.type_name.clone(),
            members: n.members.clone(),
            args: n.args.iter().map(|a| substitute(a, replacement)).collect(),
        }),
        Expr::Lambda(l) => Expr::Lambda(LambdaExpr {
            body: Box::new(substitute(&l.body, replacement)),
        }),
        Expr::Call(c) => Expr::Call(CallExpr {
            op: c.op,
            source: Box::new(substitute(&c.source, replacement)),
            args: c.args.iter().map(|a| substitute(a, replacement)).collect(),
        }),
        other => other.clone(),
    }
}

#[test]
fn test_substitute_replaces_var_everywhere() {
    use crate::expr::BinaryOp;
    use crate::value::Value;
    let body = Expr::binary(
        BinaryOp::Eq,
        Expr::member(Expr::Var, "Name"),
        Expr::constant(Value::Int(1)),
    );
    let replacement = Expr::constant(Value::Text("shape".to_string()));
    let result = substitute(&body, &replacement);
    match result {
        Expr::Binary { left, .. } => match *left {
            Expr::Member { object, .. } => {
                assert_eq!(*object, replacement);
            }
            other => panic!("expected member, got {:?}", other),
        },
        other => panic!("expected binary, got {:?}", other),
    }
    // The original body is untouched.
    assert!(matches!(
        body,
        Expr::Binary { .. }
    ));
}

#[test]
fn test_identity_selector() {
    assert!(is_identity(&Expr::Var));
    assert!(!is_identity(&Expr::member(Expr::Var, "Name")));
}
