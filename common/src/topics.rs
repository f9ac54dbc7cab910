/// Topic set rooted at the per-device base prefix `home/<location>/<device_id>`.
#[derive(Debug, Clone)]
pub struct Topics {
    base: String,
}

impl Topics {
    pub fn new(location: &str, device_id: &str) -> Self {
        Self {
            base: format!("home/{location}/{device_id}"),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Availability topic; also the last-will target carrying "offline".
    pub fn status(&self) -> String {
        format!("{}/status", self.base)
    }

    pub fn state(&self) -> String {
        format!("{}/state", self.base)
    }

    pub fn command(&self) -> String {
        format!("{}/command", self.base)
    }

    pub fn command_response(&self) -> String {
        format!("{}/command/response", self.base)
    }

    pub fn config(&self) -> String {
        format!("{}/config", self.base)
    }

    pub fn led_command(&self) -> String {
        format!("{}/led/command", self.base)
    }

    pub fn led_state(&self) -> String {
        format!("{}/led/state", self.base)
    }

    pub fn ota(&self) -> String {
        format!("{}/ota", self.base)
    }

    pub fn ota_status(&self) -> String {
        format!("{}/ota/status", self.base)
    }

    /// Inbound topics, in the order they are (re)subscribed.
    pub fn subscriptions(&self) -> Vec<String> {
        vec![
            self.command(),
            self.config(),
            self.led_command(),
            self.ota(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn topics_follow_base_prefix() {
        let topics = Topics::new("living_room", "a1b2c3d4");

        assert_eq!(topics.base(), "home/living_room/a1b2c3d4");
        assert_eq!(topics.status(), "home/living_room/a1b2c3d4/status");
        assert_eq!(topics.ota_status(), "home/living_room/a1b2c3d4/ota/status");
        assert_eq!(
            topics.subscriptions(),
            vec![
                "home/living_room/a1b2c3d4/command",
                "home/living_room/a1b2c3d4/config",
                "home/living_room/a1b2c3d4/led/command",
                "home/living_room/a1b2c3d4/ota",
            ]
        );
    }
}
