//! Recursive-descent parser (spec §4.7 step 2; spec §9 Design Notes permits
//! "any parser generator or hand-written recursive-descent implementation").
//! Productions and precedence follow `mdb/query/parse.py`'s PLY grammar:
//! `or` < `and` < comparisons < arithmetic (`+ - * div mod`, left-assoc,
//! `union`/`intersect`/`except` at `+ -` precedence per the source's
//! `precedence` table) < unary < path/step.

use super::ast::*;
use super::lexer::{Lexer, Spanned, Token};
use super::Error;

pub fn parse(src: &str) -> Result<Expr, Error> {
    let tokens = Lexer::new(src).tokenize()?;
    let mut p = Parser { tokens, pos: 0 };
    let expr = p.parse_expr_list()?;
    p.expect_eof()?;
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos].token
    }

    fn peek_pos(&self) -> usize {
        self.tokens[self.pos].pos
    }

    fn bump(&mut self) -> Token {
        let t = self.tokens[self.pos].token.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn error_here(&self) -> Error {
        Error::Syntax { pos: self.peek_pos(), token: format!("{:?}", self.peek()) }
    }

    fn expect(&mut self, expected: &Token) -> Result<(), Error> {
        if self.peek() == expected {
            self.bump();
            Ok(())
        } else {
            Err(self.error_here())
        }
    }

    fn expect_eof(&mut self) -> Result<(), Error> {
        if matches!(self.peek(), Token::Eof) {
            Ok(())
        } else {
            Err(self.error_here())
        }
    }

    fn eat(&mut self, t: &Token) -> bool {
        if self.peek() == t {
            self.bump();
            true
        } else {
            false
        }
    }

    /// `Expr : ExprList` — a single member is returned bare; 2+ members
    /// become [`Expr::Sequence`] (spec §4.7's `ast.Expr(*expr)`).
    fn parse_expr_list(&mut self) -> Result<Expr, Error> {
        let mut members = vec![self.parse_expr_single()?];
        while self.eat(&Token::Comma) {
            members.push(self.parse_expr_single()?);
        }
        Ok(if members.len() == 1 { members.pop().unwrap() } else { Expr::Sequence(members) })
    }

    fn parse_expr_single(&mut self) -> Result<Expr, Error> {
        match self.peek() {
            Token::For => self.parse_for(),
            Token::Quantity(_) => self.parse_quantified(),
            Token::If => self.parse_if(),
            _ => self.parse_or(),
        }
    }

    fn parse_for(&mut self) -> Result<Expr, Error> {
        self.expect(&Token::For)?;
        let bindings = self.parse_var_in_list()?;
        self.expect(&Token::Return)?;
        let body = Box::new(self.parse_expr_single()?);
        Ok(Expr::For { bindings, body })
    }

    fn parse_quantified(&mut self) -> Result<Expr, Error> {
        let quant = match self.bump() {
            Token::Quantity(q) => q,
            _ => unreachable!(),
        };
        let bindings = self.parse_var_in_list()?;
        self.expect(&Token::Satisfies)?;
        let body = Box::new(self.parse_expr_single()?);
        Ok(Expr::Quantified { quant, bindings, body })
    }

    fn parse_var_in_list(&mut self) -> Result<Vec<VarIn>, Error> {
        let mut out = vec![self.parse_var_in()?];
        while self.eat(&Token::Comma) {
            out.push(self.parse_var_in()?);
        }
        Ok(out)
    }

    fn parse_var_in(&mut self) -> Result<VarIn, Error> {
        self.expect(&Token::Dollar)?;
        let name = self.parse_any_name()?;
        self.expect(&Token::In)?;
        let expr = self.parse_expr_single()?;
        Ok(VarIn { name, expr })
    }

    fn parse_if(&mut self) -> Result<Expr, Error> {
        self.expect(&Token::If)?;
        self.expect(&Token::LParen)?;
        let cond = Box::new(self.parse_expr_list()?);
        self.expect(&Token::RParen)?;
        self.expect(&Token::Then)?;
        let then_branch = Box::new(self.parse_expr_single()?);
        self.expect(&Token::Else)?;
        let else_branch = Box::new(self.parse_expr_single()?);
        Ok(Expr::If { cond, then_branch, else_branch })
    }

    fn parse_or(&mut self) -> Result<Expr, Error> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, Error> {
        let mut left = self.parse_cmp()?;
        while self.eat(&Token::And) {
            let right = self.parse_cmp()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    /// Non-associative in the source grammar (`CmpExpr : BinOpExpr CMP
    /// BinOpExpr`, no recursive `CmpExpr` on either side) — at most one
    /// comparison per `CmpExpr`.
    fn parse_cmp(&mut self) -> Result<Expr, Error> {
        let left = self.parse_range()?;
        if let Token::Cmp(op) = self.peek().clone() {
            self.bump();
            let right = self.parse_range()?;
            return Ok(Expr::CmpOp { op, left: Box::new(left), right: Box::new(right) });
        }
        Ok(left)
    }

    fn parse_range(&mut self) -> Result<Expr, Error> {
        let from = self.parse_additive()?;
        if self.eat(&Token::To) {
            let to = self.parse_additive()?;
            return Ok(Expr::Range { from: Box::new(from), to: Box::new(to) });
        }
        Ok(from)
    }

    fn parse_additive(&mut self) -> Result<Expr, Error> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOpKind::Add,
                Token::Minus => BinOpKind::Sub,
                Token::UnionWord => BinOpKind::Union,
                Token::Union => BinOpKind::Union,
                Token::IntersectWord => BinOpKind::Intersect,
                Token::ExceptWord => BinOpKind::Except,
                _ => break,
            };
            self.bump();
            let right = self.parse_multiplicative()?;
            left = Expr::BinOp { op, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, Error> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOpKind::Mul,
                Token::Div => BinOpKind::Div,
                Token::Mod => BinOpKind::Mod,
                _ => break,
            };
            self.bump();
            let right = self.parse_unary()?;
            left = Expr::BinOp { op, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, Error> {
        if self.eat(&Token::Minus) {
            return Ok(Expr::UnaryMinus(Box::new(self.parse_path_expr()?)));
        }
        if self.eat(&Token::Plus) {
            return self.parse_path_expr();
        }
        self.parse_path_expr()
    }

    /// `PathExpr` (spec §4.7 step 2). An absolute path prepends the
    /// `self::root()`/`descendant-or-self::*` implicit steps the source
    /// assembles in `p_PathExpr_root`/`p_PathExpr_abs_dslash`.
    fn parse_path_expr(&mut self) -> Result<Expr, Error> {
        let root_step = Expr::AxisStep { axis: Axis::SelfAxis, test: NodeTest::Name("root".to_string()) };
        let descendant_step =
            Expr::AxisStep { axis: Axis::DescendantOrSelf, test: NodeTest::Wildcard };

        if self.eat(&Token::DSlash) {
            let mut steps = vec![root_step, descendant_step];
            steps.extend(self.parse_relative_path_expr()?);
            return Ok(Expr::Steps(steps));
        }
        if self.eat(&Token::Slash) {
            if self.starts_relative_path_expr() {
                let mut steps = vec![root_step];
                steps.extend(self.parse_relative_path_expr()?);
                return Ok(Expr::Steps(steps));
            }
            return Ok(Expr::Steps(vec![root_step]));
        }
        let steps = self.parse_relative_path_expr()?;
        Ok(if steps.len() == 1 { steps.into_iter().next().unwrap() } else { Expr::Steps(steps) })
    }

    fn starts_relative_path_expr(&self) -> bool {
        !matches!(
            self.peek(),
            Token::Eof
                | Token::RParen
                | Token::RBracket
                | Token::Comma
                | Token::Return
                | Token::In
                | Token::Satisfies
                | Token::Then
                | Token::Else
                | Token::Or
                | Token::And
                | Token::Cmp(_)
                | Token::To
                | Token::Plus
                | Token::Minus
                | Token::Star
                | Token::Div
                | Token::Mod
                | Token::UnionWord
                | Token::Union
                | Token::IntersectWord
                | Token::ExceptWord
        )
    }

    fn parse_relative_path_expr(&mut self) -> Result<Vec<Expr>, Error> {
        let mut steps = vec![self.parse_step_expr()?];
        loop {
            if self.eat(&Token::DSlash) {
                steps.push(Expr::AxisStep { axis: Axis::DescendantOrSelf, test: NodeTest::Wildcard });
                steps.push(self.parse_step_expr()?);
            } else if matches!(self.peek(), Token::Slash) {
                self.bump();
                steps.push(self.parse_step_expr()?);
            } else if matches!(self.peek(), Token::LBracket) {
                steps.push(self.parse_predicate()?);
            } else {
                break;
            }
        }
        Ok(steps)
    }

    fn parse_predicate(&mut self) -> Result<Expr, Error> {
        self.expect(&Token::LBracket)?;
        let e = self.parse_expr_list()?;
        self.expect(&Token::RBracket)?;
        Ok(Expr::Predicate(Box::new(e)))
    }

    fn parse_step_expr(&mut self) -> Result<Expr, Error> {
        match self.peek() {
            Token::At => {
                self.bump();
                let test = self.parse_node_reduce()?;
                Ok(Expr::AxisStep { axis: Axis::Attribute, test })
            }
            Token::DDot => {
                self.bump();
                Ok(Expr::AxisStep { axis: Axis::Parent, test: NodeTest::Wildcard })
            }
            Token::Dot => {
                self.bump();
                Ok(Expr::ContextItem)
            }
            Token::Name(name) => {
                let name = name.clone();
                // Axis step `name::test`, or an abbreviated child step.
                if self.tokens.get(self.pos + 1).map(|s| &s.token) == Some(&Token::DColon) {
                    self.bump();
                    self.bump();
                    let test = self.parse_node_reduce()?;
                    if let Some(axis) = Axis::by_name(&name) {
                        return Ok(Expr::AxisStep { axis, test });
                    }
                    return Err(Error::NameError(name));
                }
                if self.tokens.get(self.pos + 1).map(|s| &s.token) == Some(&Token::LParen) {
                    return self.parse_function_call();
                }
                self.bump();
                Ok(Expr::AxisStep { axis: Axis::Child, test: NodeTest::Name(name) })
            }
            Token::Star => {
                self.bump();
                Ok(Expr::AxisStep { axis: Axis::Child, test: NodeTest::Wildcard })
            }
            _ => self.parse_filter_expr(),
        }
    }

    fn parse_node_reduce(&mut self) -> Result<NodeTest, Error> {
        self.parse_node_test()
    }

    fn parse_node_test(&mut self) -> Result<NodeTest, Error> {
        match self.bump() {
            Token::Star => Ok(NodeTest::Wildcard),
            Token::Name(n) => Ok(NodeTest::Name(n)),
            other => Err(Error::Syntax { pos: self.peek_pos(), token: format!("{other:?}") }),
        }
    }

    fn parse_function_call(&mut self) -> Result<Expr, Error> {
        let name = match self.bump() {
            Token::Name(n) => n,
            other => return Err(Error::Syntax { pos: self.peek_pos(), token: format!("{other:?}") }),
        };
        self.expect(&Token::LParen)?;
        let mut args = Vec::new();
        if !matches!(self.peek(), Token::RParen) {
            args.push(self.parse_expr_single()?);
            while self.eat(&Token::Comma) {
                args.push(self.parse_expr_single()?);
            }
        }
        self.expect(&Token::RParen)?;
        Ok(Expr::FunctionCall { name, args })
    }

    /// `FilterExpr : PrimaryExpr` (spec §4.7 step 3's "Filter").
    fn parse_filter_expr(&mut self) -> Result<Expr, Error> {
        let primary = self.parse_primary()?;
        Ok(Expr::Filter(Box::new(primary)))
    }

    fn parse_primary(&mut self) -> Result<Expr, Error> {
        match self.peek().clone() {
            Token::Integer(n) => {
                self.bump();
                Ok(Expr::Integer(n))
            }
            Token::Decimal(n) => {
                self.bump();
                Ok(Expr::Decimal(n))
            }
            Token::Str(s) => {
                self.bump();
                Ok(Expr::Str(s))
            }
            Token::Dollar => {
                self.bump();
                let name = self.parse_any_name()?;
                Ok(Expr::Var(name))
            }
            Token::LParen => {
                self.bump();
                if self.eat(&Token::RParen) {
                    return Ok(Expr::Sequence(Vec::new()));
                }
                let e = self.parse_expr_list()?;
                self.expect(&Token::RParen)?;
                Ok(e)
            }
            Token::Dot => {
                self.bump();
                Ok(Expr::ContextItem)
            }
            Token::Name(_) => self.parse_function_call(),
            _ => Err(self.error_here()),
        }
    }

    fn parse_any_name(&mut self) -> Result<String, Error> {
        match self.bump() {
            Token::Name(n) => Ok(n),
            Token::Return => Ok("return".to_string()),
            Token::For => Ok("for".to_string()),
            Token::In => Ok("in".to_string()),
            Token::Satisfies => Ok("satisfies".to_string()),
            Token::If => Ok("if".to_string()),
            Token::Else => Ok("else".to_string()),
            Token::Or => Ok("or".to_string()),
            Token::And => Ok("and".to_string()),
            Token::To => Ok("to".to_string()),
            Token::Div => Ok("div".to_string()),
            Token::UnionWord => Ok("union".to_string()),
            Token::IntersectWord => Ok("intersect".to_string()),
            other => Err(Error::Syntax { pos: self.peek_pos(), token: format!("{other:?}") }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_absolute_path_with_child_steps() {
        let e = parse("/site/news").unwrap();
        match e {
            Expr::Steps(steps) => assert_eq!(steps.len(), 3),
            other => panic!("expected Steps, got {other:?}"),
        }
    }

    #[test]
    fn parses_descendant_shorthand() {
        let e = parse("//Page").unwrap();
        match e {
            Expr::Steps(steps) => assert_eq!(steps.len(), 3),
            other => panic!("expected Steps, got {other:?}"),
        }
    }

    #[test]
    fn parses_predicate_and_axis_step() {
        let e = parse("child::Page[1]").unwrap();
        match e {
            Expr::Steps(steps) => {
                assert!(matches!(steps[0], Expr::AxisStep { axis: Axis::Child, .. }));
                assert!(matches!(steps[1], Expr::Predicate(_)));
            }
            other => panic!("expected Steps, got {other:?}"),
        }
    }

    #[test]
    fn parses_for_expression() {
        let e = parse("for $x in 1 to 3 return $x").unwrap();
        assert!(matches!(e, Expr::For { .. }));
    }

    #[test]
    fn parses_quantified_expression() {
        let e = parse("some $x in (1, 2) satisfies $x eq 1").unwrap();
        assert!(matches!(e, Expr::Quantified { quant: Quantifier::Some, .. }));
    }

    #[test]
    fn parses_if_expression() {
        let e = parse("if (1 eq 1) then 'a' else 'b'").unwrap();
        assert!(matches!(e, Expr::If { .. }));
    }

    #[test]
    fn parses_arithmetic_precedence() {
        // 1 + 2 * 3 should be Add(1, Mul(2, 3)).
        let e = parse("1 + 2 * 3").unwrap();
        match e {
            Expr::BinOp { op: BinOpKind::Add, right, .. } => {
                assert!(matches!(*right, Expr::BinOp { op: BinOpKind::Mul, .. }));
            }
            other => panic!("expected Add, got {other:?}"),
        }
    }

    #[test]
    fn parses_comma_sequence() {
        let e = parse("1, 2").unwrap();
        match e {
            Expr::Sequence(items) => assert_eq!(items.len(), 2),
            other => panic!("expected Sequence, got {other:?}"),
        }
    }

    #[test]
    fn reports_position_on_syntax_error() {
        let err = parse("/site[").unwrap_err();
        assert!(matches!(err, Error::Syntax { .. }));
    }
}
