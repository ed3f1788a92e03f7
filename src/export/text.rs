use anyhow::Result;
use std::io::Write;

use crate::tree::NetworkTree;

/// Write every subnet of the tree once, in input format (re-readable)
pub fn write_subnets<W: Write>(tree: &NetworkTree, mut writer: W) -> Result<()> {
    for site in tree.subnets() {
        writeln!(writer, "{}", site)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write the routers inferred for each internal node, one per line:
/// `<depth> <labels>: <addr> <addr> ...` (`root` stands in for the labels at depth 0)
pub fn write_aliases<W: Write>(tree: &NetworkTree, mut writer: W) -> Result<()> {
    for id in tree.internal_nodes() {
        let node = tree.node(id);
        for router in node.routers().iter().filter(|r| !r.is_empty()) {
            writeln!(writer, "{} {}: {}", node.depth(), tree.node_label(id), router)?;
        }
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::AliasResolver;
    use crate::state::{AliasMethod, Router, SubnetSite, parse_sites};
    use std::net::Ipv4Addr;

    struct PairResolver;

    impl AliasResolver for PairResolver {
        fn resolve(&self, interfaces: &[Ipv4Addr]) -> Vec<Router> {
            let mut router = Router::new();
            for &a in interfaces {
                router.add_interface(a, AliasMethod::UdpPortUnreachable);
            }
            vec![router]
        }
    }

    fn tree() -> NetworkTree {
        let mut tree = NetworkTree::new(4);
        for line in [
            "10.1.0.0/24 ACCURATE 2 1.0.0.1 10.1.0.1:2",
            "10.2.0.0/24 ODD 3 1.0.0.1,2.0.0.1",
            "10.3.0.0/24 SHADOW 3 1.0.0.1,2.0.0.2",
        ] {
            tree.insert(line.parse::<SubnetSite>().unwrap());
        }
        tree
    }

    #[test]
    fn test_subnets_are_rereadable() {
        let tree = tree();
        let mut buf = Vec::new();
        write_subnets(&tree, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();

        let sites = parse_sites(&text).unwrap();
        assert_eq!(sites.len(), 3);
        assert_eq!(sites[0].interfaces.len(), 1);
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn test_aliases() {
        let mut tree = tree();
        tree.infer_routers(&PairResolver);

        let mut buf = Vec::new();
        write_aliases(&tree, &mut buf).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "0 root: 1.0.0.1\n1 1.0.0.1: 2.0.0.1 2.0.0.2\n"
        );
    }
}
