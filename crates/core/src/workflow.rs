//! The fixed order workflow graph.
//!
//! Every legal status change is one named [`Edge`]. Back-edges out of
//! `PRODUCTION_FINISHED` model a failed quality check; `Cancel` is the only
//! edge that applies to a whole family of source statuses.

use serde::{Deserialize, Serialize};

use crate::capability::Capability;
use crate::status::{Department, OrderStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Edge {
    StartDesign,
    SendToStock,
    ConfirmStock,
    ReportStockIssue,
    ResolveStockIssue,
    StartProduction,
    FinishProduction,
    PassQc,
    ReturnToDesign,
    ReturnToProduction,
    ReceiveForShip,
    Ship,
    Cancel,
}

use OrderStatus::*;

const EDGES: &[(Edge, OrderStatus, OrderStatus)] = &[
    (Edge::StartDesign, PendingArtwork, Designing),
    (Edge::SendToStock, Designing, PendingStockCheck),
    (Edge::ConfirmStock, PendingStockCheck, StockRechecked),
    (Edge::ReportStockIssue, PendingStockCheck, StockIssue),
    (Edge::ResolveStockIssue, StockIssue, StockRechecked),
    (Edge::StartProduction, StockRechecked, InProduction),
    (Edge::FinishProduction, InProduction, ProductionFinished),
    (Edge::PassQc, ProductionFinished, QcPassed),
    (Edge::ReturnToDesign, ProductionFinished, Designing),
    (Edge::ReturnToProduction, ProductionFinished, InProduction),
    (Edge::ReceiveForShip, QcPassed, ReadyToShip),
    (Edge::Ship, ReadyToShip, Completed),
];

impl Edge {
    /// Resolves the edge that moves an order from `from` to `to`, if one exists.
    pub fn between(from: OrderStatus, to: OrderStatus) -> Option<Edge> {
        if to == Cancelled {
            return (!from.is_terminal()).then_some(Edge::Cancel);
        }
        EDGES
            .iter()
            .find(|(_, f, t)| *f == from && *t == to)
            .map(|(edge, _, _)| *edge)
    }

    /// Statuses reachable from `from` in one step.
    pub fn targets(from: OrderStatus) -> Vec<OrderStatus> {
        let mut out: Vec<OrderStatus> = EDGES
            .iter()
            .filter(|(_, f, _)| *f == from)
            .map(|(_, _, t)| *t)
            .collect();
        if !from.is_terminal() {
            out.push(Cancelled);
        }
        out
    }

    pub fn target(self) -> OrderStatus {
        match self {
            Edge::StartDesign => Designing,
            Edge::SendToStock => PendingStockCheck,
            Edge::ConfirmStock => StockRechecked,
            Edge::ReportStockIssue => StockIssue,
            Edge::ResolveStockIssue => StockRechecked,
            Edge::StartProduction => InProduction,
            Edge::FinishProduction => ProductionFinished,
            Edge::PassQc => QcPassed,
            Edge::ReturnToDesign => Designing,
            Edge::ReturnToProduction => InProduction,
            Edge::ReceiveForShip => ReadyToShip,
            Edge::Ship => Completed,
            Edge::Cancel => Cancelled,
        }
    }

    pub fn required_capability(self) -> Capability {
        match self {
            Edge::StartDesign => Capability::UploadArtwork,
            Edge::SendToStock => Capability::SendToNext,
            Edge::ConfirmStock | Edge::ResolveStockIssue => Capability::ConfirmStock,
            Edge::ReportStockIssue => Capability::ReportIssue,
            Edge::StartProduction => Capability::StartProduction,
            Edge::FinishProduction => Capability::FinishProduction,
            Edge::PassQc => Capability::PassQc,
            Edge::ReturnToDesign | Edge::ReturnToProduction => Capability::FailQc,
            Edge::ReceiveForShip => Capability::ReceiveForShip,
            Edge::Ship => Capability::Ship,
            Edge::Cancel => Capability::Cancel,
        }
    }

    pub fn requires_reason(self) -> bool {
        matches!(
            self,
            Edge::ReturnToDesign | Edge::ReturnToProduction | Edge::Cancel
        )
    }

    pub fn is_qc_failure(self) -> bool {
        matches!(self, Edge::ReturnToDesign | Edge::ReturnToProduction)
    }

    /// Department slot the caller takes over when it is still empty.
    pub fn claims_slot(self) -> Option<Department> {
        match self {
            Edge::StartDesign => Some(Department::Graphic),
            Edge::StartProduction => Some(Department::Production),
            _ => None,
        }
    }

    /// QC back-edge for the department a failed order returns to.
    pub fn qc_return(to: Department) -> Option<Edge> {
        match to {
            Department::Graphic => Some(Edge::ReturnToDesign),
            Department::Production => Some(Edge::ReturnToProduction),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_path_is_connected() {
        let path = [
            PendingArtwork,
            Designing,
            PendingStockCheck,
            StockRechecked,
            InProduction,
            ProductionFinished,
            QcPassed,
            ReadyToShip,
            Completed,
        ];
        for pair in path.windows(2) {
            assert!(
                Edge::between(pair[0], pair[1]).is_some(),
                "{} -> {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn qc_back_edges() {
        assert_eq!(
            Edge::between(ProductionFinished, Designing),
            Some(Edge::ReturnToDesign)
        );
        assert_eq!(
            Edge::between(ProductionFinished, InProduction),
            Some(Edge::ReturnToProduction)
        );
        assert_eq!(Edge::qc_return(Department::Graphic).map(Edge::target), Some(Designing));
        assert_eq!(Edge::qc_return(Department::Stock), None);
        assert!(Edge::ReturnToDesign.requires_reason());
    }

    #[test]
    fn unknown_edges_are_rejected() {
        assert_eq!(Edge::between(PendingArtwork, Completed), None);
        assert_eq!(Edge::between(ReadyToShip, QcPassed), None);
        assert_eq!(Edge::between(Designing, Designing), None);
    }

    #[test]
    fn cancel_only_from_non_terminal() {
        for status in OrderStatus::ALL {
            let edge = Edge::between(*status, Cancelled);
            assert_eq!(edge.is_some(), !status.is_terminal(), "{status}");
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        assert!(Edge::targets(Completed).is_empty());
        assert!(Edge::targets(Cancelled).is_empty());
        assert_eq!(Edge::targets(PendingStockCheck).len(), 3);
    }

    #[test]
    fn every_edge_target_is_consistent() {
        for (edge, from, to) in EDGES {
            assert_eq!(edge.target(), *to);
            assert_eq!(Edge::between(*from, *to), Some(*edge));
        }
        assert_eq!(Edge::Cancel.target(), Cancelled);
        assert_eq!(EDGES.len() + 1, 13, "every edge but Cancel has a table row");
    }
}
