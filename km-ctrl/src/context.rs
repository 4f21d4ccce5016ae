use std::env;

use futures::channel::mpsc::UnboundedSender;
use km_core::prelude::*;
use kube::runtime::events::{
    Recorder,
    Reporter,
};
use kube::runtime::reflector::ObjectRef;

use crate::Options;

pub struct KmakeContext {
    pub client: kube::Client,
    pub opts: Options,
    pub recorder: Recorder,

    // Runs that need their Kmake to take note of them are announced here; the Kmake controller
    // consumes the other end through `reconcile_on`
    pub kmake_trigger: UnboundedSender<ObjectRef<Kmake>>,
}

impl KmakeContext {
    pub fn new(client: kube::Client, opts: Options, kmake_trigger: UnboundedSender<ObjectRef<Kmake>>) -> KmakeContext {
        let reporter = Reporter {
            controller: CONTROLLER_NAME.into(),
            instance: env::var(POD_NAME_ENV_VAR).ok(),
        };
        let recorder = Recorder::new(client.clone(), reporter);

        KmakeContext { client, opts, recorder, kmake_trigger }
    }
}
