#[macro_export]
macro_rules! tree {
    ($e:expr) => {{
        use $crate::tree::from_newick;
        from_newick($e).unwrap().pop().unwrap()
    }};
}

#[cfg(test)]
#[cfg_attr(coverage, coverage(off))]
mod tests {
    use crate::tree::Genealogy;

    #[test]
    fn tree_macro_takes_last_tree() {
        let tree = tree!("(A:1.0,B:1.0);((A:1.0,B:1.0):1.0,C:2.0);");
        assert_eq!(tree.leaf_count(), 3);
        assert_eq!(tree.root_height(), 2.0);
    }
}
