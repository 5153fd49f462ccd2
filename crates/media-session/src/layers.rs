//! Simulcast layer selection.
//!
//! The UI reports the rendered width of each video tile; that width maps to
//! one of three spatial layers. Requests identical to the cached preference
//! are suppressed, which keeps animated resizes from turning into a stream
//! of `setConsumerLayers` calls. Requests still on the wire count as the
//! preference for suppression. The cache is only updated once the server
//! accepts a change, so a failed request is retried by the next call.

use crate::config::LayerThresholds;
use crate::consumers::ConsumerRegistry;
use crate::types::{ConsumerId, ConsumerLayers};
use std::collections::HashMap;

/// Spatial layer for a rendered width: `<= small` is 0, `<= medium` is 1,
/// anything wider is 2.
#[must_use]
pub fn spatial_layer_for_width(width: u32, thresholds: &LayerThresholds) -> u8 {
    if width <= thresholds.small_max_width {
        0
    } else if width <= thresholds.medium_max_width {
        1
    } else {
        2
    }
}

/// What to do about a layer request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerPlan {
    /// Consumer not in the registry; nothing to do.
    UnknownConsumer,
    /// Same as the cached preference; no network call.
    Unchanged,
    /// Send these layers to the server.
    Request(ConsumerLayers),
}

/// Per-session layer decisions.
///
/// Besides the thresholds it tracks the layers each consumer has on the wire,
/// so a second identical request issued before the first one completes is
/// suppressed as well.
#[derive(Debug, Clone, Default)]
pub struct LayerController {
    thresholds: LayerThresholds,
    in_flight: HashMap<ConsumerId, ConsumerLayers>,
}

impl LayerController {
    #[must_use]
    pub fn new(thresholds: LayerThresholds) -> Self {
        Self {
            thresholds,
            in_flight: HashMap::new(),
        }
    }

    #[must_use]
    pub fn thresholds(&self) -> &LayerThresholds {
        &self.thresholds
    }

    /// Plan a request for a rendered width. The temporal layer of the latest
    /// requested (or cached) preference is carried through unchanged.
    #[must_use]
    pub fn plan_for_width(
        &self,
        registry: &ConsumerRegistry,
        consumer_id: &ConsumerId,
        width: u32,
    ) -> LayerPlan {
        let Some(cached) = registry.preferred_layers(consumer_id) else {
            return LayerPlan::UnknownConsumer;
        };
        let latest = self.latest(consumer_id, cached);
        let wanted = ConsumerLayers {
            spatial_layer: spatial_layer_for_width(width, &self.thresholds),
            temporal_layer: latest.and_then(|l| l.temporal_layer),
        };
        Self::compare(latest, wanted)
    }

    /// Plan a request for explicit layers.
    #[must_use]
    pub fn plan(
        &self,
        registry: &ConsumerRegistry,
        consumer_id: &ConsumerId,
        layers: ConsumerLayers,
    ) -> LayerPlan {
        match registry.preferred_layers(consumer_id) {
            None => LayerPlan::UnknownConsumer,
            Some(cached) => Self::compare(self.latest(consumer_id, cached), layers),
        }
    }

    /// Record layers sent to the server and not yet answered.
    pub fn begin_request(&mut self, consumer_id: ConsumerId, layers: ConsumerLayers) {
        self.in_flight.insert(consumer_id, layers);
    }

    /// Clear the in-flight entry once its request completed. A newer request
    /// for different layers keeps its entry.
    pub fn finish_request(&mut self, consumer_id: &ConsumerId, layers: ConsumerLayers) {
        if self.in_flight.get(consumer_id) == Some(&layers) {
            self.in_flight.remove(consumer_id);
        }
    }

    #[must_use]
    pub fn in_flight(&self, consumer_id: &ConsumerId) -> Option<ConsumerLayers> {
        self.in_flight.get(consumer_id).copied()
    }

    pub fn forget(&mut self, consumer_id: &ConsumerId) {
        self.in_flight.remove(consumer_id);
    }

    pub fn clear(&mut self) {
        self.in_flight.clear();
    }

    fn latest(
        &self,
        consumer_id: &ConsumerId,
        cached: Option<ConsumerLayers>,
    ) -> Option<ConsumerLayers> {
        self.in_flight(consumer_id).or(cached)
    }

    fn compare(latest: Option<ConsumerLayers>, wanted: ConsumerLayers) -> LayerPlan {
        if latest == Some(wanted) {
            LayerPlan::Unchanged
        } else {
            LayerPlan::Request(wanted)
        }
    }
}
