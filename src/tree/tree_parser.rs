use std::fmt;

use anyhow::bail;
use log::info;
use pest::{error::Error as PestError, error::ErrorVariant, iterators::Pair, Parser};
use pest_derive::Parser;

use crate::tree::{
    Node,
    NodeIdx::{self, Internal as Int, Leaf},
    Tree,
};
use crate::Result;

#[derive(Parser)]
#[grammar = "./tree/newick.pest"]
pub struct NewickParser;

#[derive(Debug)]
pub(crate) struct ParsingError(pub(crate) Box<PestError<Rule>>);

impl fmt::Display for ParsingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Malformed newick string")?;
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ParsingError {}

type ParseResult<T> = std::result::Result<T, Box<PestError<Rule>>>;

/// Parses one or more `;`-terminated newick trees.
///
/// Node heights are derived from the branch lengths, the node furthest away
/// from the root gets height zero. Multifurcations are kept as polytomies.
/// Nodes are numbered in preorder.
///
/// # Example
/// ```
/// use skygrid::tree::{from_newick, Genealogy};
/// let trees = from_newick("((A:1.0,B:1.0):0.5,C:1.5);").unwrap();
/// assert_eq!(trees.len(), 1);
/// assert_eq!(trees[0].leaf_count(), 3);
/// assert_eq!(trees[0].root_height(), 1.5);
/// ```
pub fn from_newick(newick_string: &str) -> Result<Vec<Tree>> {
    info!("Parsing newick trees.");
    let newick = match NewickParser::parse(Rule::newick, newick_string) {
        Ok(mut pairs) => pairs.next(),
        Err(e) => bail!(ParsingError(Box::new(e))),
    };
    let mut trees = Vec::new();
    // trees are followed by EOI, which has no inner rule
    for rooted in newick
        .into_iter()
        .flat_map(|rule| rule.into_inner())
        .filter_map(|tree| tree.into_inner().next())
    {
        match GenealogyReader::read(rooted) {
            Ok(tree) => trees.push(tree),
            Err(e) => bail!(ParsingError(e)),
        }
    }
    info!("Finished parsing {} newick tree(s) successfully.", trees.len());
    Ok(trees)
}

/// Collects the nodes of one tree while walking its parse tree.
struct GenealogyReader {
    nodes: Vec<Node>,
}

impl GenealogyReader {
    fn read(rooted: Pair<Rule>) -> ParseResult<Tree> {
        let mut reader = Self { nodes: Vec::new() };
        let mut root = Leaf(0);
        for node in rooted.into_inner() {
            root = reader.read_node(node, None)?;
        }
        let mut tree = Tree::from_nodes(root, reader.nodes);
        tree.compute_heights();
        Ok(tree)
    }

    fn read_node(&mut self, rule: Pair<Rule>, parent: Option<NodeIdx>) -> ParseResult<NodeIdx> {
        let pos = self.nodes.len();
        let idx = match rule.as_rule() {
            Rule::leaf => Leaf(pos),
            _ => Int(pos),
        };
        let mut node = Node::new(idx, "");
        node.parent = parent;
        self.nodes.push(node);

        let mut children = Vec::new();
        for inner in rule.into_inner() {
            match inner.as_rule() {
                Rule::label => self.nodes[pos].id = inner.as_str().to_string(),
                Rule::branch_length => self.nodes[pos].blen = branch_length(inner)?,
                Rule::internal | Rule::leaf => children.push(self.read_node(inner, Some(idx))?),
                _ => unreachable!(),
            }
        }
        self.nodes[pos].children = children;
        Ok(idx)
    }
}

fn branch_length(rule: Pair<Rule>) -> ParseResult<f64> {
    let span = rule.as_span();
    let value = rule.as_str().trim_start_matches(':').trim();
    let custom_error = |message: String| {
        Box::new(PestError::new_from_span(
            ErrorVariant::CustomError { message },
            span,
        ))
    };
    match value.parse::<f64>() {
        Ok(blen) if blen >= 0.0 => Ok(blen),
        Ok(blen) => Err(custom_error(format!("Negative branch length {}", blen))),
        Err(e) => Err(custom_error(format!("Invalid branch length {}: {}", value, e))),
    }
}
