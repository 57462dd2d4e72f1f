//! Parser implementation using chumsky

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;

use crate::error::ParseError;
use crate::parser::ast::*;
use crate::parser::lexer::{self, Token};

/// Top-level item of a file: main-tree content or a `define`
#[derive(Debug, Clone)]
enum Item {
    Node(Spanned<Node>),
    Define(String, ListNode, Span),
}

/// Parse template source into its main tree and named defines
pub fn parse(name: &str, input: &str) -> Result<ParsedFile, Vec<ParseError>> {
    let len = input.len();

    let tokens = lexer::lex(input).map_err(|e| vec![e])?;
    let token_iter = tokens.into_iter().map(|(tok, span)| (tok, span.into()));

    // Turn the token iterator into a stream that chumsky can use
    let token_stream = Stream::from_iter(token_iter)
        // Split (Token, SimpleSpan) into token and span parts
        .map((len..len).into(), |(t, s): (_, _)| (t, s));

    let items = file_parser()
        .parse(token_stream)
        .into_result()
        .map_err(|errs| errs.into_iter().map(|e| e.into()).collect::<Vec<ParseError>>())?;

    assemble(name, items).map_err(|e| vec![e])
}

/// Helper to extract span range from chumsky's MapExtra
fn span_range(e: &impl chumsky::span::Span<Offset = usize>) -> std::ops::Range<usize> {
    e.start()..e.end()
}

fn pipeline_parser<'a, I>() -> impl Parser<'a, I, Pipeline, extra::Err<Rich<'a, Token>>> + Clone
where
    I: ValueInput<'a, Token = Token, Span = SimpleSpan>,
{
    recursive(|pipeline| {
        // `)` or `).Field.Chain`
        let paren_close = choice((
            select! { Token::Chain(fields) => fields },
            just(Token::ParenClose).to(Vec::new()),
        ));

        let operand = choice((
            select! {
                Token::Field(fields) => Operand::Field(fields),
                Token::Dot => Operand::Dot,
                Token::Variable(name, fields) => Operand::Variable { name, fields },
                Token::Ident(name) => Operand::Identifier(name),
                Token::String(s) => Operand::String(s),
                Token::Number(n) => Operand::Number(n),
                Token::True => Operand::Bool(true),
                Token::False => Operand::Bool(false),
                Token::Nil => Operand::Nil,
            },
            just(Token::ParenOpen)
                .ignore_then(pipeline)
                .then(paren_close)
                .map(|(pipe, fields): (Pipeline, Vec<String>)| Operand::Pipe {
                    pipe: Box::new(pipe),
                    fields,
                }),
        ))
        .map_with(|op, e| Spanned::new(op, span_range(&e.span())))
        .labelled("operand");

        let command = operand
            .repeated()
            .at_least(1)
            .collect::<Vec<_>>()
            .map_with(|args, e| Command {
                args,
                span: span_range(&e.span()),
            });

        // Declared variables cannot carry a field chain
        let declared = select! { Token::Variable(name, fields) => (name, fields) }.try_map(
            |(name, fields): (String, Vec<String>), span| {
                if fields.is_empty() {
                    Ok(name)
                } else {
                    Err(Rich::custom(span, "cannot declare a variable with fields"))
                }
            },
        );

        let decl = declared
            .separated_by(just(Token::Comma))
            .at_least(1)
            .collect::<Vec<_>>()
            .then(choice((
                just(Token::Declare).to(false),
                just(Token::Assign).to(true),
            )));

        decl.or_not()
            .then(
                command
                    .separated_by(just(Token::Pipe))
                    .at_least(1)
                    .collect::<Vec<_>>(),
            )
            .map_with(|(decl, cmds), e| {
                let (decl, is_assign) = decl.unwrap_or_default();
                Pipeline {
                    decl,
                    is_assign,
                    cmds,
                    span: span_range(&e.span()),
                }
            })
            .boxed()
    })
}

fn file_parser<'a, I>() -> impl Parser<'a, I, Vec<Item>, extra::Err<Rich<'a, Token>>> + Clone
where
    I: ValueInput<'a, Token = Token, Span = SimpleSpan>,
{
    let pipeline = pipeline_parser();
    let open = just(Token::Open);
    let close = just(Token::Close);
    let end_action = open.clone().then(just(Token::End)).then(close.clone());
    let name = select! { Token::String(s) => s }.labelled("template name");

    let node = recursive(|node| {
        let list = node
            .clone()
            .repeated()
            .collect::<Vec<_>>()
            .map(ListNode::new);

        // `{{else}} list` or `{{else <kw> p}} list [else ...]`, sharing the outer `{{end}}`
        let else_chain = |kw: Token, make: fn(Branch) -> Node| {
            let open = open.clone();
            let close = close.clone();
            let pipeline = pipeline.clone();
            let list = list.clone();
            recursive(move |tail| {
                let chained = open
                    .clone()
                    .then(just(Token::Else))
                    .then(just(kw.clone()))
                    .ignore_then(pipeline.clone())
                    .then_ignore(close.clone())
                    .then(list.clone())
                    .then(tail.or_not())
                    .map_with(move |((pipe, body), else_list), e| {
                        let branch = Branch {
                            pipe,
                            list: body,
                            else_list,
                        };
                        ListNode::new(vec![Spanned::new(make(branch), span_range(&e.span()))])
                    });
                let plain = open
                    .clone()
                    .then(just(Token::Else))
                    .then(close.clone())
                    .ignore_then(list.clone());
                chained.or(plain).boxed()
            })
        };

        let text = select! { Token::Text(s) => Node::Text(s) };

        let action = open
            .clone()
            .ignore_then(pipeline.clone())
            .then_ignore(close.clone())
            .map(Node::Action);

        let if_block = open
            .clone()
            .ignore_then(just(Token::If))
            .ignore_then(pipeline.clone())
            .then_ignore(close.clone())
            .then(list.clone())
            .then(else_chain(Token::If, Node::If).or_not())
            .then_ignore(end_action.clone())
            .map(|((pipe, list), else_list)| {
                Node::If(Branch {
                    pipe,
                    list,
                    else_list,
                })
            });

        let with_block = open
            .clone()
            .ignore_then(just(Token::With))
            .ignore_then(pipeline.clone())
            .then_ignore(close.clone())
            .then(list.clone())
            .then(else_chain(Token::With, Node::With).or_not())
            .then_ignore(end_action.clone())
            .map(|((pipe, list), else_list)| {
                Node::With(Branch {
                    pipe,
                    list,
                    else_list,
                })
            });

        let range_else = open
            .clone()
            .then(just(Token::Else))
            .then(close.clone())
            .ignore_then(list.clone());

        let range_block = open
            .clone()
            .ignore_then(just(Token::Range))
            .ignore_then(pipeline.clone())
            .then_ignore(close.clone())
            .then(list.clone())
            .then(range_else.or_not())
            .then_ignore(end_action.clone())
            .map(|((pipe, list), else_list)| {
                Node::Range(Branch {
                    pipe,
                    list,
                    else_list,
                })
            });

        let template = open
            .clone()
            .ignore_then(just(Token::Template))
            .ignore_then(name.clone())
            .then(pipeline.clone().or_not())
            .then_ignore(close.clone())
            .map(|(name, pipe)| Node::Template(TemplateCall { name, pipe }));

        let block = open
            .clone()
            .ignore_then(just(Token::Block))
            .ignore_then(name.clone())
            .then(pipeline.clone())
            .then_ignore(close.clone())
            .then(list.clone())
            .then_ignore(end_action.clone())
            .map(|((name, pipe), list)| Node::Block(BlockCall { name, pipe, list }));

        let loop_control = open
            .clone()
            .ignore_then(choice((
                just(Token::Break).to(Node::Break),
                just(Token::Continue).to(Node::Continue),
            )))
            .then_ignore(close.clone());

        // Keyword blocks first; a plain action would reject them anyway since
        // keywords are never operands.
        choice((
            text,
            if_block,
            range_block,
            with_block,
            template,
            block,
            loop_control,
            action,
        ))
        .map_with(|n, e| Spanned::new(n, span_range(&e.span())))
        .boxed()
    });

    let body = node
        .clone()
        .repeated()
        .collect::<Vec<_>>()
        .map(ListNode::new);

    let define = open
        .clone()
        .ignore_then(just(Token::Define))
        .ignore_then(name)
        .then_ignore(close.clone())
        .then(body)
        .then_ignore(end_action)
        .map_with(|(name, body), e| Item::Define(name, body, span_range(&e.span())));

    choice((define, node.map(Item::Node)))
        .repeated()
        .collect()
        .then_ignore(end())
}

/// Split top-level items into the main tree and its defines, hoist the
/// default bodies of `block`s and check loop-control placement.
fn assemble(name: &str, items: Vec<Item>) -> Result<ParsedFile, ParseError> {
    let mut nodes = Vec::new();
    let mut defines: Vec<Tree> = Vec::new();

    for item in items {
        match item {
            Item::Node(node) => nodes.push(node),
            Item::Define(def_name, body, span) => add_define(&mut defines, def_name, body, span)?,
        }
    }

    let tree = Tree::new(name, ListNode::new(nodes));

    let mut blocks = Vec::new();
    collect_blocks(&tree.root, &mut blocks);
    for define in &defines {
        collect_blocks(&define.root, &mut blocks);
    }
    for (block_name, body, span) in blocks {
        add_define(&mut defines, block_name, body, span)?;
    }

    check_loop_control(&tree.root, false)?;
    for define in &defines {
        check_loop_control(&define.root, false)?;
    }

    Ok(ParsedFile { tree, defines })
}

fn add_define(
    defines: &mut Vec<Tree>,
    name: String,
    body: ListNode,
    span: Span,
) -> Result<(), ParseError> {
    if defines.iter().any(|d| d.name == name) {
        return Err(ParseError::Syntax {
            span,
            message: format!("template {:?} redefined", name),
            expected: vec![],
        });
    }
    defines.push(Tree::new(name, body));
    Ok(())
}

fn collect_blocks(list: &ListNode, out: &mut Vec<(String, ListNode, Span)>) {
    for node in &list.nodes {
        match &node.node {
            Node::Block(block) => {
                out.push((block.name.clone(), block.list.clone(), node.span.clone()));
                collect_blocks(&block.list, out);
            }
            Node::If(b) | Node::Range(b) | Node::With(b) => {
                collect_blocks(&b.list, out);
                if let Some(else_list) = &b.else_list {
                    collect_blocks(else_list, out);
                }
            }
            _ => {}
        }
    }
}

fn check_loop_control(list: &ListNode, in_range: bool) -> Result<(), ParseError> {
    for node in &list.nodes {
        match &node.node {
            Node::Break | Node::Continue if !in_range => {
                let keyword = if matches!(node.node, Node::Break) {
                    "break"
                } else {
                    "continue"
                };
                return Err(ParseError::Syntax {
                    span: node.span.clone(),
                    message: format!("{{{{{}}}}} outside {{{{range}}}}", keyword),
                    expected: vec![],
                });
            }
            Node::Range(b) => {
                check_loop_control(&b.list, true)?;
                if let Some(else_list) = &b.else_list {
                    check_loop_control(else_list, in_range)?;
                }
            }
            Node::If(b) | Node::With(b) => {
                check_loop_control(&b.list, in_range)?;
                if let Some(else_list) = &b.else_list {
                    check_loop_control(else_list, in_range)?;
                }
            }
            // A block body runs as its own template, outside any loop
            Node::Block(block) => check_loop_control(&block.list, false)?,
            _ => {}
        }
    }
    Ok(())
}
